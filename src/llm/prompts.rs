// ABOUTME: System prompt construction parameterized by request-derived hints
// ABOUTME: Base assistant instructions plus optional geography and locale lines
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use crate::models::{ChatModel, RequestHints};

const BASE_PROMPT: &str = "You are a friendly assistant. Keep your responses concise and helpful.";

const TOOLS_PROMPT: &str = "\
You have tools available: get_weather for forecasts, create_document and \
update_document for substantial content the user will want to keep or edit, \
and request_suggestions for improving an existing document. Use a tool only \
when it serves the request; answer directly otherwise.";

/// Build the effective system prompt for a turn
///
/// The reasoning model variant omits the tool guidance since that surface is
/// kept for the default model.
#[must_use]
pub fn system_prompt(model: ChatModel, hints: &RequestHints) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    let hints_block = hints_block(hints);
    if !hints_block.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&hints_block);
    }

    if model == ChatModel::Default {
        prompt.push_str("\n\n");
        prompt.push_str(TOOLS_PROMPT);
    }

    prompt
}

/// Render what is known about the caller's origin
fn hints_block(hints: &RequestHints) -> String {
    let mut lines = Vec::new();

    if let Some(ref city) = hints.city {
        lines.push(format!("- city: {city}"));
    }
    if let Some(ref country) = hints.country {
        lines.push(format!("- country: {country}"));
    }
    if let (Some(latitude), Some(longitude)) = (hints.latitude, hints.longitude) {
        lines.push(format!("- coordinates: {latitude}, {longitude}"));
    }
    if let Some(ref locale) = hints.locale {
        lines.push(format!("- locale: {locale}"));
    }

    if lines.is_empty() {
        return String::new();
    }

    format!(
        "About the origin of the user's request:\n{}",
        lines.join("\n")
    )
}
