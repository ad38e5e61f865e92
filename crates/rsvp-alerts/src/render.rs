//! Digest rendering: a plain-text body and a templated HTML body.

use handlebars::Handlebars;
use serde::Serialize;
use std::fmt::Write;
use tracing::warn;

use crate::error::{AlertError, Result};
use crate::reconcile::{HistoryGroup, RsvpTable};

const TEMPLATE_NAME: &str = "digest";

/// Built-in HTML digest, used when no template is published.
pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{title}}</title>
<style>
    body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; color: #1f2937; }
    h2 { font-size: 18px; color: #374151; }
    h3 { font-size: 16px; margin: 16px 0 4px 0; }
    .change { font-size: 14px; padding: 2px 0; }
</style>
</head>
<body>
{{#if history}}
<h2>All changes</h2>
{{#each history}}
<h3>{{heading}}</h3>
{{#each lines}}
<div class="change">{{this}}</div>
{{/each}}
{{/each}}
<br><br>
<h2>Net changes</h2>
{{/if}}
{{#each sections}}
<h3>{{heading}}</h3>
{{#each lines}}
<div class="change">{{this}}</div>
{{/each}}
{{/each}}
</body>
</html>
"#;

/// Text and HTML bodies of one digest email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDigest {
    pub text: String,
    pub html: String,
}

#[derive(Serialize)]
struct Section<'a> {
    heading: &'a str,
    lines: Vec<&'a str>,
}

#[derive(Serialize)]
struct DigestContext<'a> {
    title: &'a str,
    sections: Vec<Section<'a>>,
    history: Option<Vec<Section<'a>>>,
}

/// Renders reconciled RSVP tables into digest bodies.
pub struct DigestRenderer {
    handlebars: Handlebars<'static>,
    title: String,
}

impl DigestRenderer {
    /// Compile `template`, or the built-in template when it is absent or
    /// does not compile.
    pub fn new(template: Option<&str>, title: impl Into<String>) -> Result<Self> {
        let mut handlebars = Handlebars::new();

        let custom = template.and_then(|source| {
            handlebars
                .register_template_string(TEMPLATE_NAME, source)
                .map_err(|e| warn!(error = %e, "Digest template is invalid, using built-in template"))
                .ok()
        });

        if custom.is_none() {
            handlebars
                .register_template_string(TEMPLATE_NAME, DEFAULT_TEMPLATE)
                .map_err(|e| AlertError::Template(format!("Invalid built-in template: {e}")))?;
        }

        Ok(Self {
            handlebars,
            title: title.into(),
        })
    }

    /// Digest of net changes only.
    pub fn render(&self, table: &RsvpTable) -> Result<RenderedDigest> {
        let html = self.render_html(table, None)?;
        Ok(RenderedDigest {
            text: text_digest(table),
            html,
        })
    }

    /// Digest listing every individual change ahead of the net changes.
    pub fn render_with_history(
        &self,
        table: &RsvpTable,
        history: &[HistoryGroup],
    ) -> Result<RenderedDigest> {
        let html = self.render_html(table, Some(history))?;

        let mut text = String::from("All changes:\n");
        text.push_str(&history_text(history));
        text.push_str("\nNet changes:\n");
        text.push_str(&text_digest(table));

        Ok(RenderedDigest { text, html })
    }

    fn render_html(&self, table: &RsvpTable, history: Option<&[HistoryGroup]>) -> Result<String> {
        let context = DigestContext {
            title: &self.title,
            sections: table
                .iter()
                .map(|event| Section {
                    heading: &event.label,
                    lines: event.changes.iter().map(|c| c.sentence.as_str()).collect(),
                })
                .collect(),
            history: history.map(|groups| {
                groups
                    .iter()
                    .map(|group| Section {
                        heading: &group.label,
                        lines: group.sentences.iter().map(String::as_str).collect(),
                    })
                    .collect()
            }),
        };

        self.handlebars
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| AlertError::Template(format!("Failed to render digest: {e}")))
    }
}

/// One `label:` line per event followed by its indented sentences.
#[must_use]
pub fn text_digest(table: &RsvpTable) -> String {
    let mut out = String::new();
    for event in table.iter() {
        let _ = writeln!(out, "{}:", event.label);
        for change in &event.changes {
            let _ = writeln!(out, "  {}", change.sentence);
        }
    }
    out
}

fn history_text(history: &[HistoryGroup]) -> String {
    let mut out = String::new();
    for group in history {
        let _ = writeln!(out, "{}:", group.label);
        for sentence in &group.sentences {
            let _ = writeln!(out, "  {sentence}");
        }
    }
    out
}
