//! Signal-backed presenter for the desktop window

use dioxus::prelude::*;

use crate::playground::{Control, Presenter};

/// Writes playground updates into Dioxus signals
#[derive(Clone, Copy, PartialEq)]
pub struct DioxusPresenter {
    pub progress: Signal<String>,
    pub output: Signal<String>,
    pub load_enabled: Signal<bool>,
    pub generate_enabled: Signal<bool>,
}

/// Creates the presenter's signals, already in the idle state
pub fn use_presenter() -> DioxusPresenter {
    DioxusPresenter {
        progress: use_signal(String::new),
        output: use_signal(String::new),
        load_enabled: use_signal(|| true),
        generate_enabled: use_signal(|| false),
    }
}

// Only writes when the value changes
fn replace<T: PartialEq + 'static>(mut signal: Signal<T>, value: T) {
    if *signal.peek() != value {
        signal.set(value);
    }
}

impl Presenter for DioxusPresenter {
    fn render_progress(&self, text: &str) {
        replace(self.progress, text.to_string());
    }

    fn render_output(&self, text: &str) {
        replace(self.output, text.to_string());
    }

    fn set_control_enabled(&self, control: Control, enabled: bool) {
        let signal = match control {
            Control::LoadModel => self.load_enabled,
            Control::Generate => self.generate_enabled,
        };
        replace(signal, enabled);
    }
}
