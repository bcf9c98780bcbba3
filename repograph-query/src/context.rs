// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Render retrieved context into the prompt block handed to the model

use crate::retriever::RetrievedContext;
use std::fmt::Write;

pub const NO_CONTEXT: &str = "No context found.";

fn clip(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

/// Semantic matches first, then code entities; blocks that would overflow
/// `max_chars` are left out.
pub fn format_context(ctx: &RetrievedContext, snippet_chars: usize, max_chars: usize) -> String {
    if ctx.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let mut out = String::new();
    let fits = |out: &String, block: &str| out.len() + block.len() <= max_chars;

    let mut header = Some("## Semantic Matches\n\n");
    for hit in &ctx.vector_hits {
        let mut block = header.take().unwrap_or_default().to_string();
        let _ = write!(block, "### {}:{}-{}", hit.file_path, hit.start_line, hit.end_line);
        if let Some(symbol) = &hit.symbol_name {
            let _ = write!(block, " ({symbol})");
        }
        let _ = write!(block, "\n```\n{}\n```\n\n", clip(hit.content.trim(), snippet_chars));
        if !fits(&out, &block) {
            break;
        }
        out.push_str(&block);
    }

    let mut header = Some("## Code Entities\n\n");
    for entity in &ctx.entities {
        let mut line = header.take().unwrap_or_default().to_string();
        let _ = write!(
            line,
            "- `{}` ({}) in {}:{}-{}",
            entity.name, entity.kind, entity.file_path, entity.start_line, entity.end_line
        );
        if let Some(signature) = &entity.signature {
            let _ = write!(line, " `{}`", clip(signature, 120));
        }
        if let Some(description) = &entity.description {
            let _ = write!(line, ": {}", clip(description, 200));
        }
        line.push('\n');
        if !fits(&out, &line) {
            break;
        }
        out.push_str(&line);
    }

    if out.trim().is_empty() {
        return NO_CONTEXT.to_string();
    }
    out
}
