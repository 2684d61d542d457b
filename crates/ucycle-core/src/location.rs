// Device location: permission-aware, timeout-bounded, shared with everyone
use crate::error::LocationError;
use crate::models::{LocationPoint, Position};
use crate::notify::{NoticeKind, NotificationDispatcher};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Platform capabilities we ask permission for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Geolocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Never asked; the next sensor query will prompt the user
    Prompt,
}

/// Single place every permission question goes through
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionPort: Send + Sync {
    async fn check_permission(&self, capability: Capability) -> PermissionState;
}

/// Options handed to the sensor for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached reading the sensor may hand back
    pub maximum_age: Duration,
}

/// One-shot geolocation sensor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeoSensor: Send + Sync {
    /// False when the device has no location capability at all
    fn is_supported(&self) -> bool;

    async fn current_position(&self, options: PositionOptions) -> Result<Position, LocationError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSettings {
    pub timeout: Duration,
    pub max_age: Duration,
    /// Where the map sits when we have no idea where the user is
    pub default_center: LocationPoint,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_age: Duration::from_secs(60),
            default_center: LocationPoint::new(-33.7507, 150.6944),
        }
    }
}

/// How a caller wants its position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Never surface a notice to the user
    pub silent: bool,
    /// Bypass cached readings (posting needs the real current spot)
    pub fresh: bool,
}

impl AcquireOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            fresh: false,
        }
    }

    pub fn interactive() -> Self {
        Self::default()
    }

    pub fn fresh() -> Self {
        Self {
            silent: false,
            fresh: true,
        }
    }
}

/// Owns the device's current position
///
/// Successful reads update one shared value everyone can watch. Once the user
/// denies permission we stop asking until the platform reports a grant.
pub struct LocationProvider {
    sensor: Arc<dyn GeoSensor>,
    permissions: Arc<dyn PermissionPort>,
    settings: LocationSettings,
    current: watch::Sender<Option<Position>>,
    denied: AtomicBool,
    /// The first-grant notice has gone out
    announced: AtomicBool,
    notices: Option<Arc<NotificationDispatcher>>,
}

impl LocationProvider {
    pub fn new(
        sensor: Arc<dyn GeoSensor>,
        permissions: Arc<dyn PermissionPort>,
        settings: LocationSettings,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            sensor,
            permissions,
            settings,
            current,
            denied: AtomicBool::new(false),
            announced: AtomicBool::new(false),
            notices: None,
        }
    }

    /// Surface first-grant success/failure through this dispatcher
    pub fn with_notices(mut self, notices: Arc<NotificationDispatcher>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Acquire the device position
    ///
    /// Failures leave the shared value untouched, so callers keep the last
    /// known location (or fall back to `center_or_default`).
    pub async fn acquire(&self, options: AcquireOptions) -> Result<Position, LocationError> {
        let permission = self
            .permissions
            .check_permission(Capability::Geolocation)
            .await;
        let prompting = permission == PermissionState::Prompt;

        let result = self.try_acquire(permission, options).await;

        match &result {
            Ok(position) => debug!(
                "Location {:.5}, {:.5}",
                position.point.latitude, position.point.longitude
            ),
            Err(e) => warn!("Location unavailable: {}", e),
        }

        if !options.silent && prompting && !self.announced.swap(true, Ordering::SeqCst) {
            self.announce_first_grant(&result);
        }

        result
    }

    async fn try_acquire(
        &self,
        permission: PermissionState,
        options: AcquireOptions,
    ) -> Result<Position, LocationError> {
        if !self.sensor.is_supported() {
            return Err(LocationError::Unsupported);
        }

        match permission {
            PermissionState::Denied => {
                self.denied.store(true, Ordering::SeqCst);
                return Err(LocationError::PermissionDenied);
            }
            PermissionState::Prompt if self.denied.load(Ordering::SeqCst) => {
                // Already said no once; don't nag
                return Err(LocationError::PermissionDenied);
            }
            PermissionState::Granted => self.denied.store(false, Ordering::SeqCst),
            PermissionState::Prompt => {}
        }

        if !options.fresh {
            if let Some(cached) = self.cached() {
                return Ok(cached);
            }
        }

        let query = PositionOptions {
            high_accuracy: true,
            timeout: self.settings.timeout,
            maximum_age: if options.fresh {
                Duration::ZERO
            } else {
                self.settings.max_age
            },
        };

        let position = match tokio::time::timeout(
            self.settings.timeout,
            self.sensor.current_position(query),
        )
        .await
        {
            Ok(Ok(position)) => position,
            Ok(Err(LocationError::PermissionDenied)) => {
                self.denied.store(true, Ordering::SeqCst);
                return Err(LocationError::PermissionDenied);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(LocationError::Timeout),
        };

        self.current.send_replace(Some(position));
        Ok(position)
    }

    /// Last reading if it is young enough to reuse
    fn cached(&self) -> Option<Position> {
        let cached = (*self.current.borrow())?;
        (cached.age(Utc::now()) <= self.settings.max_age).then_some(cached)
    }

    fn announce_first_grant(&self, result: &Result<Position, LocationError>) {
        let Some(notices) = &self.notices else {
            return;
        };

        match result {
            Ok(_) => {
                info!("Location permission granted");
                notices.show("Location enabled - showing items near you", NoticeKind::Info);
            }
            Err(e) => {
                notices.show(
                    format!("Couldn't get your location ({}). Showing all items.", e),
                    NoticeKind::Warning,
                );
            }
        }
    }

    /// Last known position, however old
    pub fn current(&self) -> Option<Position> {
        *self.current.borrow()
    }

    pub fn current_point(&self) -> Option<LocationPoint> {
        self.current().map(|p| p.point)
    }

    /// Last known point, or the configured default center
    pub fn center_or_default(&self) -> LocationPoint {
        self.current_point()
            .unwrap_or(self.settings.default_center)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Position>> {
        self.current.subscribe()
    }

    pub fn settings(&self) -> &LocationSettings {
        &self.settings
    }
}
