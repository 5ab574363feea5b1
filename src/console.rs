//! Terminal front-end
//!
//! Hosts the playground in a terminal: progress on a spinner line, output on
//! stdout.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::inference::InferenceEngine;
use crate::playground::{Control, Playground, Presenter};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeadlessError {
    #[error("model could not be loaded")]
    LoadFailed,
    #[error("generation failed")]
    GenerateFailed,
}

pub struct ConsolePresenter {
    spinner: ProgressBar,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        Self { spinner }
    }

    /// A presenter that draws nothing
    pub fn hidden() -> Self {
        Self {
            spinner: ProgressBar::hidden(),
        }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    /// Last progress line shown
    pub fn status(&self) -> String {
        self.spinner.message()
    }
}

impl Default for ConsolePresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter for ConsolePresenter {
    fn render_progress(&self, text: &str) {
        self.spinner.set_message(text.to_string());
    }

    fn render_output(&self, text: &str) {
        self.spinner.suspend(|| println!("{text}"));
    }

    fn set_control_enabled(&self, control: Control, enabled: bool) {
        tracing::debug!("{:?} enabled={}", control, enabled);
    }
}

/// Loads the configured model, then generates once for `prompt`.
pub async fn run_once<E: InferenceEngine>(
    playground: &Playground<E, ConsolePresenter>,
    prompt: &str,
) -> Result<String, HeadlessError> {
    if !playground.load_model().await {
        let status = playground.presenter().status();
        playground.presenter().finish();
        eprintln!("{status}");
        return Err(HeadlessError::LoadFailed);
    }

    let output = playground.generate(prompt).await;
    playground.presenter().finish();
    output.ok_or(HeadlessError::GenerateFailed)
}
