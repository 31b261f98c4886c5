use anyhow::Result;
#[cfg(feature = "colored-output")]
use colored::*;
use eventdesk_client::{Event, EventPage, Participant, UserProfile};
use serde::Serialize;

use crate::cli::OutputFormat;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

pub struct OutputManager {
    format: OutputFormat,
    #[cfg_attr(not(feature = "colored-output"), allow(dead_code))]
    colored: bool,
}

impl OutputManager {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colored: cfg!(feature = "colored-output"),
        }
    }

    pub fn user(&self, user: &UserProfile) -> Result<String> {
        if self.format == OutputFormat::Json {
            return json(user);
        }

        let mut output = format!("{} ({})", self.highlight(&user.email), user.id);
        if let Some(name) = &user.name {
            output.push_str(&format!("\n  Name: {name}"));
        }
        if let Some(roles) = user.extra.get("roles") {
            output.push_str(&format!("\n  Roles: {roles}"));
        }
        Ok(output)
    }

    pub fn event(&self, event: &Event) -> Result<String> {
        if self.format == OutputFormat::Json {
            return json(event);
        }
        Ok(self.event_line(event))
    }

    pub fn events(&self, page: &EventPage) -> Result<String> {
        if self.format == OutputFormat::Json {
            return json(page);
        }

        let pagination = &page.pagination;
        if pagination.content.is_empty() {
            return Ok("No events found".to_string());
        }

        let mut output = String::new();
        for event in &pagination.content {
            output.push_str(&self.event_line(event));
            output.push('\n');
        }
        output.push_str(&format!(
            "Page {}/{} ({} events)",
            pagination.number + 1,
            pagination.total_pages.max(1),
            pagination.total_elements
        ));
        Ok(output)
    }

    pub fn participants(&self, participants: &[Participant]) -> Result<String> {
        if self.format == OutputFormat::Json {
            return json(participants);
        }
        if participants.is_empty() {
            return Ok("No participants".to_string());
        }

        let checked_in = participants.iter().filter(|p| p.is_checked_in()).count();
        let mut output = String::new();
        for participant in participants {
            output.push_str(&self.participant_line(participant));
            output.push('\n');
        }
        output.push_str(&format!(
            "{checked_in}/{} checked in",
            participants.len()
        ));
        Ok(output)
    }

    /// One line announcing a live check-in.
    pub fn check_in(&self, participant: &Participant) -> Result<String> {
        if self.format == OutputFormat::Json {
            return Ok(serde_json::to_string(participant)?);
        }
        Ok(format!("{} {}", self.success("checked in:"), self.participant_line(participant)))
    }

    pub fn value<T: Serialize>(&self, value: &T) -> Result<String> {
        json(value)
    }

    fn event_line(&self, event: &Event) -> String {
        let start = event
            .start_time
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = event.status.as_deref().unwrap_or("-");
        format!(
            "[{}] {}  {}  {}",
            event.id,
            self.highlight(&event.title),
            start,
            status
        )
    }

    fn participant_line(&self, participant: &Participant) -> String {
        let name = participant.user.name.as_deref().unwrap_or("");
        let status = match participant.check_in_time {
            Some(at) => self.success(&at.format(TIME_FORMAT).to_string()),
            None => "not checked in".to_string(),
        };
        format!("{:<32} {:<24} {}", participant.user.email, name, status)
    }

    fn highlight(&self, text: &str) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                return text.cyan().bold().to_string();
            }
        }
        text.to_string()
    }

    fn success(&self, text: &str) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                return text.green().to_string();
            }
        }
        text.to_string()
    }
}

fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
