//! Output renderers for CLI commands.

use anyhow::Context;
use buildserver_core::{BuildDetails, BuildListResult};
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Json,
    Table,
}

pub(crate) fn render_build(details: &BuildDetails, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => to_json(details),
        OutputFormat::Table => {
            let rows = [
                ("ID", details.id.to_string()),
                ("Number", details.number.clone()),
                ("State", details.state.clone()),
                ("Status", details.status.clone()),
                ("Branch", details.branch_name.clone()),
                ("Pipeline", details.build_type_id.clone()),
                ("Comment", details.comment.text.clone()),
                ("WebURL", details.web_url.clone()),
            ];
            let mut out = format!("{:<10} {}\n", "KEY", "VALUE");
            for (key, value) in rows {
                out.push_str(&format!("{key:<10} {value}\n"));
            }
            Ok(out)
        }
    }
}

pub(crate) fn render_build_list(list: &BuildListResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => to_json(list),
        OutputFormat::Table => {
            let mut out = format!(
                "{:<10} {:<30} {:<24} {:<10} {}\n",
                "ID", "PIPELINE", "BRANCH", "STATE", "STATUS"
            );
            for build in &list.builds {
                out.push_str(&format!(
                    "{:<10} {:<30} {:<24} {:<10} {}\n",
                    build.id,
                    build.build_type_id,
                    or_dash(&build.branch_name),
                    build.state,
                    or_dash(&build.status)
                ));
            }
            if let Some(next) = &list.next_href {
                out.push_str(&format!("next page: {next}\n"));
            }
            Ok(out)
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let mut text = serde_json::to_string_pretty(value).context("failed to format JSON")?;
    text.push('\n');
    Ok(text)
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}
