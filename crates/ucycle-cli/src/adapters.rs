// Terminal stand-ins for the device: fixed position, static permissions, bell
use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use tokio::sync::watch;
use ucycle_core::{
    AudioCue, Capability, FeedHealth, GeoSensor, LocationError, LocationPoint, Notice, NoticeKind,
    PermissionPort, PermissionState, Position, PositionOptions,
};

/// "Sensor" that reports the coordinates given on the command line
///
/// Without coordinates the device has no location capability at all.
pub struct FixedPositionSensor {
    point: Option<LocationPoint>,
}

impl FixedPositionSensor {
    pub fn new(point: Option<LocationPoint>) -> Self {
        Self { point }
    }
}

#[async_trait]
impl GeoSensor for FixedPositionSensor {
    fn is_supported(&self) -> bool {
        self.point.is_some()
    }

    async fn current_position(&self, _options: PositionOptions) -> Result<Position, LocationError> {
        self.point
            .map(|point| Position::new(point, Utc::now()))
            .ok_or_else(|| LocationError::Unavailable("no --lat/--lon given".into()))
    }
}

/// Passing coordinates on the command line counts as consent
pub struct StaticPermissions(pub PermissionState);

#[async_trait]
impl PermissionPort for StaticPermissions {
    async fn check_permission(&self, _capability: Capability) -> PermissionState {
        self.0
    }
}

pub struct TerminalBell;

impl AudioCue for TerminalBell {
    fn play(&self, _kind: NoticeKind) -> std::io::Result<()> {
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07")?;
        stderr.flush()
    }
}

/// Print each notice as it appears until the dispatcher goes away
pub async fn print_notices(mut notices: watch::Receiver<Option<Notice>>) {
    while notices.changed().await.is_ok() {
        let current = notices.borrow_and_update().clone();
        if let Some(notice) = current {
            println!(
                "[{}] {} {}",
                notice.shown_at.format("%H:%M:%S"),
                notice.kind.emoji(),
                notice.message
            );
        }
    }
}

/// Report when the directory goes away and when it comes back
pub async fn print_health(mut health: watch::Receiver<FeedHealth>) {
    let mut was_healthy = true;
    while health.changed().await.is_ok() {
        let current = health.borrow_and_update().clone();
        if let Some(line) = health_change(was_healthy, &current) {
            eprintln!("{}", line);
        }
        was_healthy = current.is_healthy();
    }
}

fn health_change(was_healthy: bool, health: &FeedHealth) -> Option<String> {
    match (was_healthy, health.is_healthy()) {
        (true, false) => Some(format!(
            "⚠ Directory unreachable, will retry on the next poll ({})",
            health
                .last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default()
        )),
        (false, true) => Some("Directory reachable again".to_string()),
        _ => None,
    }
}
