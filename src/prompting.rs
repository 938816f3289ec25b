// 系统提示词构建：基础行为规则、能力概览与按工具键入的使用指引。
use crate::schemas::ToolSpec;
use crate::tools::CHART_TOOL;

pub const STATS_TOOL: &str = "dashboard_stats";

const USER_MANAGEMENT_TOOLS: [&str; 6] = [
    "create_user",
    "update_user",
    "delete_user",
    "restore_user",
    "search_users",
    "list_users",
];

/// 纯函数：同一份工具目录与上下文输入必须产出字节级一致的提示词。
pub fn build_system_prompt(
    tools: &[ToolSpec],
    user_name: Option<&str>,
    date: Option<&str>,
) -> String {
    let mut sections = vec![base_rules(user_name, date), capability_summary(tools)];
    if !tools.is_empty() {
        sections.push(tools_list(tools));
        if let Some(block) = chart_guidance(tools) {
            sections.push(block);
        }
        if let Some(block) = stats_guidance(tools) {
            sections.push(block);
        }
        if let Some(block) = user_management_guidance(tools) {
            sections.push(block);
        }
    }
    sections.join("\n\n")
}

fn base_rules(user_name: Option<&str>, date: Option<&str>) -> String {
    let mut lines = vec![
        "You are Astra, the built-in assistant of the Astra admin console.".to_string(),
        "Answer concisely, in the language the user writes in.".to_string(),
        "Never invent data: when a question concerns live accounts, statistics or charts, use the tools provided instead of guessing.".to_string(),
        "When a tool fails, explain the failure briefly and suggest what to try next; do not pretend the action succeeded.".to_string(),
    ];
    if let Some(name) = user_name.map(str::trim).filter(|value| !value.is_empty()) {
        lines.push(format!("You are currently assisting {name}."));
    }
    if let Some(date) = date.map(str::trim).filter(|value| !value.is_empty()) {
        lines.push(format!("Today's date is {date}."));
    }
    lines.join("\n")
}

fn capability_summary(tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return "No tools are available in this conversation; answer from general knowledge and say so when live data would be required.".to_string();
    }
    format!(
        "You can call {} tool(s) during this conversation. Tool results are returned to you before you continue answering.",
        tools.len()
    )
}

fn tools_list(tools: &[ToolSpec]) -> String {
    let mut lines = vec!["Available tools:".to_string()];
    for tool in tools {
        lines.push(format!("- {}: {}", tool.name, tool.description));
    }
    lines.join("\n")
}

fn chart_guidance(tools: &[ToolSpec]) -> Option<String> {
    if !has_tool(tools, CHART_TOOL) {
        return None;
    }
    Some(format!(
        "Chart requests: whenever the user asks to see, draw, update or change a chart, you MUST call the {CHART_TOOL} tool with the complete data. \
Describing the chart in prose, or claiming it was updated without a tool call, is a failure: the dashboard only changes when the tool runs. \
Pick the chart_type that fits the data (bar for comparisons, line/area for trends, pie for shares), give it a short title, and pass every data point."
    ))
}

fn stats_guidance(tools: &[ToolSpec]) -> Option<String> {
    if !has_tool(tools, STATS_TOOL) {
        return None;
    }
    Some(format!(
        "For questions about totals or account activity, fetch fresh numbers with {STATS_TOOL} first."
    ))
}

fn user_management_guidance(tools: &[ToolSpec]) -> Option<String> {
    let present: Vec<&str> = USER_MANAGEMENT_TOOLS
        .iter()
        .copied()
        .filter(|name| has_tool(tools, name))
        .collect();
    if present.is_empty() {
        return None;
    }
    let mut text = String::from(
        "User management: accounts are addressed by id, never by display name. \
When the user refers to an account by name or email, first locate it",
    );
    if present.contains(&"search_users") {
        text.push_str(" with search_users");
    } else if present.contains(&"list_users") {
        text.push_str(" with list_users");
    }
    text.push_str(", then perform the change using the id from the result.");
    if present.contains(&"delete_user") {
        text.push_str(" Deletion is soft: deleted accounts stay recoverable");
        if present.contains(&"restore_user") {
            text.push_str(" via restore_user");
        }
        text.push('.');
    }
    text.push_str(" Confirm destructive changes back to the user after the tool result arrives.");
    Some(text)
}

fn has_tool(tools: &[ToolSpec], name: &str) -> bool {
    tools.iter().any(|tool| tool.name == name)
}
