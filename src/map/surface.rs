use tracing::info;

use crate::map::{MapScene, Overlay};

/// Adapter to whatever draws the map.
pub trait MapSurface {
    fn render(&mut self, scene: &MapScene);
}

/// Writes each scene to the log; used by the console binary.
#[derive(Debug, Default)]
pub struct LogSurface {
    frames: u64,
}

impl LogSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl MapSurface for LogSurface {
    fn render(&mut self, scene: &MapScene) {
        self.frames += 1;

        let info = scene.info.as_ref();
        let status = info.map(|info| info.status.as_str()).unwrap_or("loading");

        match (&scene.delivery, &scene.overlay) {
            (Some(delivery), _) => info!(
                frame = self.frames,
                status,
                lat = delivery.position.lat,
                lng = delivery.position.lng,
                label = %delivery.label,
                recenter = scene.recenter,
                live = info.is_some_and(|info| info.live),
                distance_km = info.and_then(|info| info.distance_to_destination_km),
                "delivery position"
            ),
            (None, Some(Overlay::WaitingForLocation { message })) => {
                info!(frame = self.frames, status, %message, "waiting for live location")
            }
            (None, _) => info!(frame = self.frames, "loading tracking view"),
        }
    }
}
