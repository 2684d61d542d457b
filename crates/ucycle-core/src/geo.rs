// Proximity filtering - pure functions, no I/O, no clocks of their own
use crate::models::{Category, Item, LocationPoint};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points (haversine)
pub fn distance_km(a: LocationPoint, b: LocationPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1 for antipodal points
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Keep items within `radius_km` of `center`
///
/// With no center this is the identity: a missing location must never hide
/// every listing.
pub fn within_radius<'a, I>(items: I, center: Option<LocationPoint>, radius_km: f64) -> Vec<&'a Item>
where
    I: IntoIterator<Item = &'a Item>,
{
    match center {
        Some(center) => items
            .into_iter()
            .filter(|item| distance_km(center, item.location()) <= radius_km)
            .collect(),
        None => items.into_iter().collect(),
    }
}

/// Exact category match, identity when no category is selected
pub fn by_category<'a, I>(items: I, category: Option<Category>) -> Vec<&'a Item>
where
    I: IntoIterator<Item = &'a Item>,
{
    match category {
        Some(category) => items
            .into_iter()
            .filter(|item| item.category == category)
            .collect(),
        None => items.into_iter().collect(),
    }
}

/// Intersection with the favorite set, identity when disabled
pub fn by_favorites<'a, I>(items: I, favorites: &BTreeSet<String>, enabled: bool) -> Vec<&'a Item>
where
    I: IntoIterator<Item = &'a Item>,
{
    if !enabled {
        return items.into_iter().collect();
    }

    items
        .into_iter()
        .filter(|item| favorites.contains(&item.id))
        .collect()
}

/// Browse filter settings
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFilter {
    pub radius_km: f64,
    pub category: Option<Category>,
    pub favorites_only: bool,
    /// Show collected, removed and expired listings as well
    pub include_inactive: bool,
}

impl Default for DisplayFilter {
    fn default() -> Self {
        Self {
            radius_km: 10.0,
            category: None,
            favorites_only: false,
            include_inactive: false,
        }
    }
}

/// An item with its distance from the viewer, if we know where they are
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyItem<'a> {
    pub item: &'a Item,
    pub distance_km: Option<f64>,
}

impl NearbyItem<'_> {
    pub fn formatted_distance(&self) -> Option<String> {
        self.distance_km.map(format_distance)
    }
}

/// The list the user browses: radius, then category, then favorites,
/// annotated with distance and sorted nearest first
pub fn display_set<'a>(
    items: &'a [Item],
    center: Option<LocationPoint>,
    filter: &DisplayFilter,
    favorites: &BTreeSet<String>,
    now: DateTime<Utc>,
) -> Vec<NearbyItem<'a>> {
    let live = items
        .iter()
        .filter(|item| filter.include_inactive || item.is_live(now));

    let kept = within_radius(live, center, filter.radius_km);
    let kept = by_category(kept, filter.category);
    let kept = by_favorites(kept, favorites, filter.favorites_only);

    let mut annotated: Vec<NearbyItem<'a>> = kept
        .into_iter()
        .map(|item| NearbyItem {
            item,
            distance_km: center.map(|c| distance_km(c, item.location())),
        })
        .collect();

    // Stable sort, so without a center the feed order is kept
    annotated.sort_by(|a, b| match (a.distance_km, b.distance_km) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => std::cmp::Ordering::Equal,
    });

    annotated
}

/// "457m" under a kilometre, "5.7km" from there on
pub fn format_distance(km: f64) -> String {
    let metres = (km * 1000.0).round();
    if metres < 1000.0 {
        format!("{}m", metres as u64)
    } else {
        format!("{:.1}km", km)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemStatus;
    use chrono::Duration;

    const PENRITH: LocationPoint = LocationPoint {
        latitude: -33.7507,
        longitude: 150.6944,
    };

    fn item_at(id: &str, lat: f64, lon: f64, category: Category) -> Item {
        let now = Utc::now();
        Item {
            id: id.to_string(),
            title: format!("Item {}", id),
            category,
            description: String::new(),
            latitude: lat,
            longitude: lon,
            status: ItemStatus::Active,
            created_at: now,
            expires_at: now + Duration::hours(48),
        }
    }

    /// Point roughly `km` south of Penrith
    fn km_south(km: f64) -> (f64, f64) {
        (PENRITH.latitude - km / 111.19, PENRITH.longitude)
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(distance_km(PENRITH, PENRITH), 0.0);
        let london = LocationPoint::new(51.5074, -0.1278);
        assert_eq!(distance_km(london, london), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let london = LocationPoint::new(51.5074, -0.1278);
        let paris = LocationPoint::new(48.8566, 2.3522);
        assert_eq!(distance_km(london, paris), distance_km(paris, london));
    }

    #[test]
    fn test_known_distances() {
        let one_km_south = LocationPoint::new(-33.7597, 150.6944);
        assert!((distance_km(PENRITH, one_km_south) - 1.0).abs() < 0.05);

        let london = LocationPoint::new(51.5074, -0.1278);
        let paris = LocationPoint::new(48.8566, 2.3522);
        let d = distance_km(london, paris);
        assert!(d > 340.0 && d < 350.0, "London to Paris was {}", d);

        let equator = distance_km(LocationPoint::new(0.0, 0.0), LocationPoint::new(0.0, 1.0));
        assert!(equator > 110.0 && equator < 112.0);

        let sydney = LocationPoint::new(-33.8688, 151.2093);
        let d = distance_km(sydney, london);
        assert!(d > 16_500.0 && d < 17_500.0);
    }

    #[test]
    fn test_triangle_inequality() {
        let a = PENRITH;
        let b = LocationPoint::new(-33.8688, 151.2093);
        let c = LocationPoint::new(-35.2809, 149.1300);
        assert!(distance_km(a, c) <= distance_km(a, b) + distance_km(b, c) + 1e-9);
    }

    #[test]
    fn test_radius_growth_only_adds_items() {
        let (lat5, lon5) = km_south(5.0);
        let (lat15, lon15) = km_south(15.0);
        let (lat30, lon30) = km_south(30.0);
        let items = vec![
            item_at("near", lat5, lon5, Category::Books),
            item_at("mid", lat15, lon15, Category::Books),
            item_at("far", lat30, lon30, Category::Books),
        ];

        let ten: Vec<&str> = within_radius(&items, Some(PENRITH), 10.0)
            .into_iter()
            .map(|i| i.id.as_str())
            .collect();
        let twenty: Vec<&str> = within_radius(&items, Some(PENRITH), 20.0)
            .into_iter()
            .map(|i| i.id.as_str())
            .collect();

        assert_eq!(ten, vec!["near"]);
        assert_eq!(twenty, vec!["near", "mid"]);
        assert!(ten.iter().all(|id| twenty.contains(id)));
    }

    #[test]
    fn test_missing_center_keeps_everything() {
        let (lat, lon) = km_south(500.0);
        let items = vec![item_at("a", lat, lon, Category::Toys)];
        assert_eq!(within_radius(&items, None, 0.1).len(), 1);
    }

    #[test]
    fn test_category_and_favorite_filters() {
        let items = vec![
            item_at("a", PENRITH.latitude, PENRITH.longitude, Category::Books),
            item_at("b", PENRITH.latitude, PENRITH.longitude, Category::Garden),
            item_at("c", PENRITH.latitude, PENRITH.longitude, Category::Books),
        ];
        let favorites: BTreeSet<String> = ["c".to_string(), "b".to_string()].into();

        assert_eq!(by_category(&items, None).len(), 3);
        assert_eq!(by_category(&items, Some(Category::Books)).len(), 2);
        assert_eq!(by_favorites(&items, &favorites, false).len(), 3);

        let books_then_favs = by_favorites(by_category(&items, Some(Category::Books)), &favorites, true);
        let favs_then_books = by_category(by_favorites(&items, &favorites, true), Some(Category::Books));
        assert_eq!(books_then_favs, favs_then_books);
        assert_eq!(books_then_favs[0].id, "c");
    }

    #[test]
    fn test_display_set_sorts_and_hides_inactive() {
        let (lat2, lon2) = km_south(2.0);
        let (lat1, lon1) = km_south(1.0);
        let mut collected = item_at("gone", PENRITH.latitude, PENRITH.longitude, Category::Books);
        collected.status = ItemStatus::Collected;
        let mut expired = item_at("old", PENRITH.latitude, PENRITH.longitude, Category::Books);
        expired.expires_at = Utc::now() - Duration::hours(1);

        let items = vec![
            item_at("two", lat2, lon2, Category::Books),
            item_at("one", lat1, lon1, Category::Books),
            collected,
            expired,
        ];

        let view = display_set(&items, Some(PENRITH), &DisplayFilter::default(), &BTreeSet::new(), Utc::now());
        let ids: Vec<&str> = view.iter().map(|n| n.item.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
        assert_eq!(view[0].formatted_distance().as_deref(), Some("1.0km"));

        let everything = DisplayFilter {
            include_inactive: true,
            ..DisplayFilter::default()
        };
        assert_eq!(display_set(&items, Some(PENRITH), &everything, &BTreeSet::new(), Utc::now()).len(), 4);

        let unlocated = display_set(&items, None, &DisplayFilter::default(), &BTreeSet::new(), Utc::now());
        let ids: Vec<&str> = unlocated.iter().map(|n| n.item.id.as_str()).collect();
        assert_eq!(ids, vec!["two", "one"]);
        assert!(unlocated.iter().all(|n| n.distance_km.is_none()));
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.5), "500m");
        assert_eq!(format_distance(0.05), "50m");
        assert_eq!(format_distance(0.999), "999m");
        assert_eq!(format_distance(0.9996), "1.0km");
        assert_eq!(format_distance(0.9999), "1.0km");
        assert_eq!(format_distance(0.4567), "457m");
        assert_eq!(format_distance(1.0), "1.0km");
        assert_eq!(format_distance(1.001), "1.0km");
        assert_eq!(format_distance(5.678), "5.7km");
        assert_eq!(format_distance(100.5), "100.5km");
    }
}
