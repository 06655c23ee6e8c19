//! Visual status indicator

use tracing::info;

/// The on-screen indicator; only the feedback owner touches it
pub trait Overlay: Send {
    fn show(&mut self, text: &str);
    fn hide(&mut self);
}

/// Indicator rendered as log lines
#[derive(Debug, Default)]
pub struct LogOverlay {
    visible: bool,
}

impl Overlay for LogOverlay {
    fn show(&mut self, text: &str) {
        self.visible = true;
        info!(text, "indicator shown");
    }

    fn hide(&mut self) {
        if std::mem::take(&mut self.visible) {
            info!("indicator hidden");
        }
    }
}
