//! Operator prompts.

use anyhow::Result;
use colored::Colorize;
use dialoguer::{Confirm, Input};
use tracing::warn;

use crate::upgrade::plan::NodeDescriptor;

/// Decides whether a run goes on after a worker failed.
pub trait Prompter: Send + Sync {
    /// Called only when `failed` is not the last worker.
    fn confirm_continue(&self, failed: &NodeDescriptor, remaining: usize) -> bool;
}

/// Asks on the terminal. Anything other than an explicit "yes" stops the run.
pub struct DialoguerPrompter;

impl Prompter for DialoguerPrompter {
    fn confirm_continue(&self, failed: &NodeDescriptor, remaining: usize) -> bool {
        println!();
        let prompt = format!(
            "{} failed. Continue with the remaining {} worker(s)?",
            failed.name, remaining
        );
        match Confirm::new().with_prompt(prompt).default(false).interact() {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Continuation prompt unavailable, stopping: {}", e);
                false
            }
        }
    }
}

/// Always continues. Used with `--yes`.
pub struct AutoApprove;

impl Prompter for AutoApprove {
    fn confirm_continue(&self, _failed: &NodeDescriptor, _remaining: usize) -> bool {
        true
    }
}

/// Require the operator to type `Yes` before anything is touched.
pub fn confirm_start() -> Result<bool> {
    println!(
        "{}",
        "This will drain and upgrade the nodes listed above. This action cannot be undone."
            .yellow()
            .bold()
    );

    let confirmation: String = Input::new()
        .with_prompt(format!("Type {} to confirm", "Yes".green().bold()))
        .interact_text()?;

    if confirmation != "Yes" {
        println!(
            "{}",
            "Upgrade cancelled. You must type 'Yes' to proceed.".red()
        );
        return Ok(false);
    }
    Ok(true)
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedPrompter;
    use super::*;

    #[test]
    fn test_auto_approve_always_continues() {
        let node = NodeDescriptor::new("w1", "10.0.0.11");
        assert!(AutoApprove.confirm_continue(&node, 3));
    }

    #[test]
    fn test_scripted_prompter_defaults_to_decline() {
        let prompter = ScriptedPrompter::answering(&[true]);
        let node = NodeDescriptor::new("w1", "10.0.0.11");
        assert!(prompter.confirm_continue(&node, 2));
        assert!(!prompter.confirm_continue(&node, 1));
        assert_eq!(
            prompter.asked(),
            vec![("w1".to_string(), 2), ("w1".to_string(), 1)]
        );
    }
}
