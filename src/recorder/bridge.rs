use tracing::info;

/// Receives the visibility transitions of the recording timeline
///
/// The owning UI implements this to hide the widget and the surrounding
/// chrome while the capture is set up and torn down.
pub trait PresentationBridge: Send + Sync {
    fn on_widget_hidden_change(&self, hidden: bool);

    fn on_chrome_hidden_change(&self, hidden: bool);
}

/// Bridge that only logs the transitions
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBridge;

impl PresentationBridge for TracingBridge {
    fn on_widget_hidden_change(&self, hidden: bool) {
        info!(hidden, "Widget visibility changed");
    }

    fn on_chrome_hidden_change(&self, hidden: bool) {
        info!(hidden, "Chrome visibility changed");
    }
}
