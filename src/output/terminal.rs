//! Terminal renderer: discoveries grouped by file, then a per-file summary.

use colored::{ColoredString, Colorize};

use crate::models::DiscoveryState;
use crate::output::{DiscoveryReport, OutputRenderer};

pub struct TerminalRenderer;

fn state_label(state: DiscoveryState) -> ColoredString {
    let label = state.to_string();
    match state {
        DiscoveryState::New => label.red().bold(),
        DiscoveryState::Addressing => label.yellow().bold(),
        DiscoveryState::Fixed => label.green().bold(),
        DiscoveryState::FalsePositive | DiscoveryState::NotRelevant => label.dimmed(),
    }
}

fn short_commit(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

impl OutputRenderer for TerminalRenderer {
    fn render(&self, report: &DiscoveryReport) -> String {
        if report.discoveries.is_empty() {
            return format!("{}", "  ✔ No discoveries.\n".green());
        }

        let mut output = String::new();
        let mut sorted = report.discoveries.clone();
        sorted.sort_by(|a, b| {
            a.file_name
                .cmp(&b.file_name)
                .then(a.line_number.cmp(&b.line_number))
                .then(a.id.cmp(&b.id))
        });

        let mut current_file = "";
        for d in &sorted {
            if d.file_name != current_file {
                if !current_file.is_empty() {
                    output.push('\n');
                }
                current_file = &d.file_name;
                output.push_str(&format!(" {}\n", d.file_name.bold()));
            }

            let location = if d.line_number >= 0 {
                format!("{:>5}", d.line_number)
            } else {
                format!("{:>5}", "-")
            };
            output.push_str(&format!(
                "  {} {} {}  {}",
                location.dimmed(),
                format!("#{}", d.id).cyan(),
                state_label(d.state),
                d.snippet.trim_end()
            ));
            if !d.commit_id.is_empty() {
                output.push_str(&format!("  {}", short_commit(&d.commit_id).dimmed()));
            }
            output.push('\n');
        }

        output.push_str(&format!("\n{}\n", "───────────────────────────────────".dimmed()));
        for f in &report.files {
            output.push_str(&format!(
                " {:<40} {} new, {} addressing, {} false_positive, {} not_relevant, {} fixed\n",
                f.file_name,
                f.new.to_string().red().bold(),
                f.addressing.to_string().yellow(),
                f.false_positive,
                f.not_relevant,
                f.fixed.to_string().green(),
            ));
        }
        output.push_str(&format!(
            " {} distinct snippets, {} shown\n",
            report.total.to_string().bold(),
            report.discoveries.len()
        ));

        output
    }
}
