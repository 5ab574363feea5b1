use dioxus::prelude::*;

use crate::app::AppState;
use crate::ui::components::loading::Spinner;

/// Load button, prompt box, and the progress and output areas
#[component]
pub fn PlaygroundPanel() -> Element {
    let state = use_context::<AppState>();
    let presenter = state.presenter;
    let mut input = use_signal(String::new);
    let mut is_loading = use_signal(|| false);

    let load_enabled = *presenter.load_enabled.read();
    let generate_enabled = *presenter.generate_enabled.read();
    let progress = presenter.progress.read().clone();
    let output = presenter.output.read().clone();

    let load_state = state.clone();
    let handle_load = move |_| {
        // Claimed synchronously; a repeated click is a no-op
        if !load_state.playground.start_load() {
            return;
        }
        is_loading.set(true);
        let state = load_state.clone();
        spawn(async move {
            state.playground.complete_load().await;
            is_loading.set(false);
            state.refresh_cache_status();
        });
    };

    let playground = state.playground.clone();
    let handle_generate = move |_| {
        let Some(prompt) = playground.start_generate(&input()) else {
            return;
        };
        let playground = playground.clone();
        spawn(async move {
            playground.complete_generate(&prompt).await;
        });
    };

    let model = &state.playground.config().model;
    let cache_status = state.cache_status.read().clone();

    rsx! {
        div {
            class: "w-full max-w-3xl mx-auto flex flex-col gap-4 p-8",

            // Model header
            div {
                class: "flex items-center justify-between gap-3 p-4 border border-[var(--border-subtle)] rounded-xl bg-[var(--bg-surface)]",
                div {
                    class: "flex flex-col min-w-0",
                    span { class: "text-[10px] uppercase tracking-wider text-[var(--text-tertiary)] font-bold select-none", "Model" }
                    span { class: "text-sm font-mono truncate text-[var(--text-primary)]", title: "{model.repo_id}", "{model.file_name}" }
                    span { class: "text-[10px] text-[var(--text-tertiary)]", "{cache_status}" }
                }
                button {
                    id: "loadModel",
                    onclick: handle_load,
                    disabled: !load_enabled,
                    class: "flex items-center gap-2 bg-[var(--accent-primary)] hover:bg-[var(--accent-hover)] text-white text-sm font-medium px-4 py-2 rounded-md transition-all active:scale-[0.98] disabled:opacity-40 disabled:cursor-not-allowed",
                    "Load Model"
                }
            }

            // Progress
            div {
                class: "flex items-center gap-3 min-h-[24px]",
                if is_loading() {
                    Spinner { size: 16 }
                }
                div {
                    id: "progress",
                    class: "text-sm text-[var(--text-secondary)]",
                    "{progress}"
                }
            }

            // Prompt
            textarea {
                id: "inputText",
                class: "w-full min-h-[120px] p-3 bg-[var(--bg-input)] border border-[var(--border-subtle)] rounded-xl text-[var(--text-primary)] resize-y placeholder-[var(--text-tertiary)] focus:outline-none focus:border-[var(--border-focus)]",
                placeholder: "Once upon a time",
                value: "{input}",
                oninput: move |evt| input.set(evt.value()),
            }

            div {
                class: "flex justify-end",
                button {
                    id: "generate",
                    onclick: handle_generate,
                    disabled: !generate_enabled,
                    class: "px-4 py-2 rounded-md bg-[var(--accent-primary)] text-[var(--accent-text)] hover:bg-[var(--accent-hover)] disabled:opacity-30 disabled:cursor-not-allowed transition-all",
                    "Generate"
                }
            }

            // Output
            div {
                id: "output",
                class: "min-h-[80px] p-4 rounded-xl bg-[var(--bg-hover)] border border-[var(--border-subtle)] whitespace-pre-wrap break-words text-[var(--text-primary)] leading-relaxed",
                "{output}"
            }
        }
    }
}
