use super::request::ReportType;

pub const SEARCH_INSTRUCTIONS: &str = r#"You are a research assistant searching the web for material on a research task.
Search the web and provide factual information with sources.
Respect every date restriction in the task and state the publication date of each source you use."#;

pub const REPORT_WRITER_INSTRUCTIONS: &str = r#"You are a research analyst. Write the requested {report_kind} for the task below.
Base the report only on the research context provided and follow every instruction in the task, including date restrictions.
{report_guidance}
Write in markdown and cite sources inline by URL where available."#;

pub const NO_CONTEXT_NOTE: &str =
    "No research context could be gathered for this task. Say so plainly, then answer from general knowledge only where the date restrictions allow it.";

fn report_guidance(report_type: ReportType) -> &'static str {
    match report_type {
        ReportType::ResearchReport => {
            "Produce a well-structured report of around 1000 words with an introduction, findings and a conclusion."
        }
        ReportType::ResourceReport => {
            "List the most relevant sources, each with a short summary of what it contributes."
        }
        ReportType::OutlineReport => {
            "Produce a hierarchical outline with headings and bullet points instead of prose."
        }
        ReportType::CustomReport => "Follow the formatting requested in the task itself.",
        ReportType::DetailedReport => {
            "Produce an in-depth report with a section for each major subtopic, covering evidence and open questions."
        }
        ReportType::SubtopicReport => {
            "Focus narrowly on the specific subtopic named in the task and avoid general background."
        }
    }
}

pub fn format_report_writer_instructions(report_type: ReportType) -> String {
    REPORT_WRITER_INSTRUCTIONS
        .replace("{report_kind}", &report_type.as_str().replace('_', " "))
        .replace("{report_guidance}", report_guidance(report_type))
}

/// Full prompt for the report writer.
pub fn format_report_prompt(report_type: ReportType, task_query: &str, context: Option<&str>) -> String {
    format!(
        "{}\n\n<Task>\n{}\n</Task>\n\n<Research Context>\n{}\n</Research Context>",
        format_report_writer_instructions(report_type),
        task_query,
        context.unwrap_or(NO_CONTEXT_NOTE)
    )
}
