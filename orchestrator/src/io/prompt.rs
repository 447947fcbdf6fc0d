//! Prompt rendering for oracle calls.
//!
//! Every decision point has its own minijinja template under `io/prompts/`.
//! Templates mark sections with `<!-- section:KEY required|droppable -->`;
//! when a rendered prompt exceeds the byte budget, droppable sections go
//! first, then the last section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use tracing::debug;

const ANALYZE_TEMPLATE: &str = include_str!("prompts/analyze.md");
const DECOMPOSE_TEMPLATE: &str = include_str!("prompts/decompose.md");
const SELECT_TOOLS_TEMPLATE: &str = include_str!("prompts/select_tools.md");
const TOOL_INPUT_TEMPLATE: &str = include_str!("prompts/tool_input.md");
const EVALUATE_TEMPLATE: &str = include_str!("prompts/evaluate.md");
const STRATEGIZE_TEMPLATE: &str = include_str!("prompts/strategize.md");
const ASSESS_TEMPLATE: &str = include_str!("prompts/assess.md");

/// Drop order when over budget: least useful context first.
const DROP_ORDER: [&str; 5] = ["context", "completed", "recent", "results", "challenges"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex should be valid")
});

/// One oracle decision point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Analyze,
    Decompose,
    SelectTools,
    ToolInput,
    Evaluate,
    Strategize,
    Assess,
}

impl PromptKind {
    pub const ALL: [PromptKind; 7] = [
        PromptKind::Analyze,
        PromptKind::Decompose,
        PromptKind::SelectTools,
        PromptKind::ToolInput,
        PromptKind::Evaluate,
        PromptKind::Strategize,
        PromptKind::Assess,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PromptKind::Analyze => "analyze",
            PromptKind::Decompose => "decompose",
            PromptKind::SelectTools => "select_tools",
            PromptKind::ToolInput => "tool_input",
            PromptKind::Evaluate => "evaluate",
            PromptKind::Strategize => "strategize",
            PromptKind::Assess => "assess",
        }
    }

    fn template(self) -> &'static str {
        match self {
            PromptKind::Analyze => ANALYZE_TEMPLATE,
            PromptKind::Decompose => DECOMPOSE_TEMPLATE,
            PromptKind::SelectTools => SELECT_TOOLS_TEMPLATE,
            PromptKind::ToolInput => TOOL_INPUT_TEMPLATE,
            PromptKind::Evaluate => EVALUATE_TEMPLATE,
            PromptKind::Strategize => STRATEGIZE_TEMPLATE,
            PromptKind::Assess => ASSESS_TEMPLATE,
        }
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, body_start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|(start, ..)| *start)
            .unwrap_or(rendered.len());
        let content = rendered[*body_start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let over = total(sections).saturating_sub(budget);
    if over == 0 {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let mut keep = last.content.len().saturating_sub(over + 12);
    while !last.content.is_char_boundary(keep) {
        keep -= 1;
    }
    let before_len = last.content.len();
    last.content.truncate(keep);
    last.content.push_str("\n[truncated]");
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

/// Renders oracle prompts within a byte budget.
#[derive(Debug)]
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        for kind in PromptKind::ALL {
            env.add_template(kind.as_str(), kind.template())
                .with_context(|| format!("load {} template", kind.as_str()))?;
        }
        Ok(Self { env, budget_bytes })
    }

    /// Render the template for `kind` with `ctx` and fit it to the budget.
    pub fn build(&self, kind: PromptKind, ctx: minijinja::Value) -> Result<String> {
        let rendered = self
            .env
            .get_template(kind.as_str())?
            .render(ctx)
            .with_context(|| format!("render {} prompt", kind.as_str()))?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    fn tool_input_ctx(results: &str, completed: &str) -> minijinja::Value {
        context! {
            goal => "Ship the release notes",
            task_json => r#"{"id":"task-1"}"#,
            tool_json => r#"{"id":"shell"}"#,
            completed => completed,
            results_json => results,
        }
    }

    #[test]
    fn every_template_renders() {
        let builder = PromptBuilder::new(100_000).expect("builder");
        for kind in PromptKind::ALL {
            let prompt = builder
                .build(kind, tool_input_ctx("[]", ""))
                .expect("render");
            assert!(prompt.contains("<contract>"), "{} has contract", kind.as_str());
        }
    }

    #[test]
    fn sections_keep_template_order() {
        let builder = PromptBuilder::new(100_000).expect("builder");
        let prompt = builder
            .build(
                PromptKind::ToolInput,
                tool_input_ctx("[{\"ok\":true}]", "- task-0: Setup"),
            )
            .expect("render");

        let contract = prompt.find("### Tool Input Contract").expect("contract");
        let goal = prompt.find("### Goal").expect("goal");
        let task = prompt.find("### Task").expect("task");
        let tool = prompt.find("### Tool\n").expect("tool");
        let completed = prompt.find("### Completed Tasks").expect("completed");
        let results = prompt.find("### Prior Results").expect("results");
        assert!(contract < goal && goal < task && task < tool);
        assert!(tool < completed && completed < results);
    }

    #[test]
    fn budget_drops_context_before_required_sections() {
        let builder = PromptBuilder::new(900).expect("builder");
        let prompt = builder
            .build(
                PromptKind::ToolInput,
                tool_input_ctx(&"r".repeat(300), &"c".repeat(600)),
            )
            .expect("render");

        assert!(!prompt.contains("### Completed Tasks"), "completed dropped");
        assert!(prompt.contains("### Tool Input Contract"));
        assert!(prompt.contains("### Task"));
    }

    #[test]
    fn empty_optional_sections_are_omitted() {
        let builder = PromptBuilder::new(100_000).expect("builder");
        let prompt = builder
            .build(PromptKind::ToolInput, tool_input_ctx("", ""))
            .expect("render");
        assert!(!prompt.contains("### Completed Tasks"));
        assert!(!prompt.contains("### Prior Results"));
    }
}
