//! UI components for PocketGen
//!
//! This module contains the desktop interface built with Dioxus.

pub mod components;
pub mod playground;
pub mod presenter;

use crate::app::AppState;
use crate::storage::settings::save_settings;
use crate::ui::playground::PlaygroundPanel;
use dioxus::prelude::*;

/// Main Application Layout
#[component]
pub fn Layout() -> Element {
    let state = use_context::<AppState>();
    let mut settings = state.settings;
    let dark_mode = settings.read().is_dark();
    let theme = if dark_mode { "dark" } else { "light" };

    rsx! {
        div {
            "data-theme": "{theme}",
            class: "flex h-screen w-screen bg-[var(--bg-main)] text-[var(--text-primary)] transition-colors duration-300 overflow-hidden font-sans",

            link { rel: "stylesheet", href: "assets/styles.css" }

            main {
                class: "flex-1 flex flex-col h-full relative min-w-0 overflow-y-auto bg-[var(--bg-main)]",

                div {
                    class: "absolute top-4 right-4 z-50",
                    button {
                        onclick: move |_| {
                            let mut settings = settings.write();
                            settings.toggle_theme();
                            if let Err(error) = save_settings(&settings) {
                                tracing::error!("Failed to save settings: {}", error);
                            }
                        },
                        class: "p-2 rounded-full hover:bg-[var(--bg-hover)] text-[var(--text-tertiary)] hover:text-[var(--text-primary)] transition-all active:scale-95",
                        title: "Toggle Theme",

                        if dark_mode {
                            // Sun icon
                            svg { width: "20", height: "20", view_box: "0 0 24 24", fill: "none", stroke: "currentColor", stroke_width: "2", stroke_linecap: "round", stroke_linejoin: "round", circle { cx: "12", cy: "12", r: "5" }, path { d: "M12 1v2M12 21v2M4.22 4.22l1.42 1.42M18.36 18.36l1.42 1.42M1 12h2M21 12h2M4.22 19.78l1.42-1.42M18.36 5.64l1.42-1.42" } }
                        } else {
                            // Moon icon
                            svg { width: "20", height: "20", view_box: "0 0 24 24", fill: "none", stroke: "currentColor", stroke_width: "2", stroke_linecap: "round", stroke_linejoin: "round", path { d: "M21 12.79A9 9 0 1 1 11.21 3 7 7 0 0 0 21 12.79z" } }
                        }
                    }
                }

                div {
                    class: "pt-12 text-center",
                    h1 { class: "text-3xl font-bold tracking-tight text-[var(--text-primary)]", "PocketGen" }
                    p { class: "text-sm text-[var(--text-secondary)]", "Local text generation from a quantized model." }
                }

                PlaygroundPanel {}
            }
        }
    }
}
