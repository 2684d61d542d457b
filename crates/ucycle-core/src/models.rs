use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A listing - somebody's unwanted thing waiting on the kerb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub category: Category,
    #[serde(default)]
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Item {
    pub fn location(&self) -> LocationPoint {
        LocationPoint::new(self.latitude, self.longitude)
    }

    /// Stored status with expiry folded in
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        match self.status {
            ItemStatus::Collected => EffectiveStatus::Collected,
            ItemStatus::Removed => EffectiveStatus::Removed,
            ItemStatus::Active if is_expired(self, now) => EffectiveStatus::Expired,
            ItemStatus::Active => EffectiveStatus::Active,
        }
    }

    /// Active and not yet past its expiry
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == EffectiveStatus::Active
    }
}

/// The one definition of expiry. Never stored, always derived.
pub fn is_expired(item: &Item, now: DateTime<Utc>) -> bool {
    now > item.expires_at
}

/// Human readable time left on a listing
pub fn time_left(item: &Item, now: DateTime<Utc>) -> String {
    if is_expired(item, now) {
        return "Expired".to_string();
    }

    let left = item.expires_at - now;
    let hours = left.num_hours();
    let minutes = (left - Duration::hours(hours)).num_minutes();

    if hours >= 24 {
        format!("{}d {}h left", hours / 24, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m left", hours, minutes)
    } else {
        format!("{}m left", minutes)
    }
}

/// Persisted lifecycle of a listing
///
/// Transitions only go forward: `Active -> Collected` or `Active -> Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    Collected,
    Removed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Collected => "collected",
            ItemStatus::Removed => "removed",
        }
    }

    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Active, ItemStatus::Collected) | (ItemStatus::Active, ItemStatus::Removed)
        )
    }

    /// Merge a freshly observed status with the one we already hold,
    /// never moving backwards
    pub fn advance(self, observed: ItemStatus) -> ItemStatus {
        if self == observed || self.can_transition_to(observed) {
            observed
        } else {
            self
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the user actually sees: stored status plus derived expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveStatus {
    Active,
    Collected,
    Removed,
    Expired,
}

impl EffectiveStatus {
    pub fn label(&self) -> &'static str {
        match self {
            EffectiveStatus::Active => "Available",
            EffectiveStatus::Collected => "Collected",
            EffectiveStatus::Removed => "Removed",
            EffectiveStatus::Expired => "Expired",
        }
    }
}

/// Fixed set of listing categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Furniture,
    Electronics,
    Appliances,
    Sports,
    Toys,
    Books,
    Clothing,
    Garden,
    Kitchen,
    Tools,
    EWaste,
    ScrapMetal,
    Cardboard,
    #[serde(other)]
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Furniture => "furniture",
            Category::Electronics => "electronics",
            Category::Appliances => "appliances",
            Category::Sports => "sports",
            Category::Toys => "toys",
            Category::Books => "books",
            Category::Clothing => "clothing",
            Category::Garden => "garden",
            Category::Kitchen => "kitchen",
            Category::Tools => "tools",
            Category::EWaste => "e-waste",
            Category::ScrapMetal => "scrap-metal",
            Category::Cardboard => "cardboard",
            Category::General => "general",
        }
    }

    pub fn all() -> Vec<Category> {
        vec![
            Category::Furniture,
            Category::Electronics,
            Category::Appliances,
            Category::Sports,
            Category::Toys,
            Category::Books,
            Category::Clothing,
            Category::Garden,
            Category::Kitchen,
            Category::Tools,
            Category::EWaste,
            Category::ScrapMetal,
            Category::Cardboard,
            Category::General,
        ]
    }

    /// Lenient decoding for directory data: unknown values become `General`
    pub fn from_wire(value: &str) -> Category {
        value.parse().unwrap_or(Category::General)
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Category::all()
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A point on the globe in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A sensor reading: where, how precise, and when
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub point: LocationPoint,
    /// Accuracy radius in metres, when the sensor reports one
    pub accuracy_m: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl Position {
    pub fn new(point: LocationPoint, captured_at: DateTime<Utc>) -> Self {
        Self {
            point,
            accuracy_m: None,
            captured_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.captured_at).to_std().unwrap_or_default()
    }
}

/// Everything needed to publish a new listing, minus the location
#[derive(Debug, Clone)]
pub struct ItemDraft {
    pub title: String,
    pub category: Category,
    pub description: String,
    pub expiry_hours: u32,
    /// Primary photo, base64 encoded
    pub image_base64: String,
    pub extra_images: Vec<String>,
}
