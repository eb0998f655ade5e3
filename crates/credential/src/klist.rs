//! `klist -f` output parsing
//!
//! Extracts the ticket-granting ticket's expiry, renewal limit and flags from
//! the credential cache listing. Handles the MIT layout
//! (`10/19/2026 10:00:00  10/19/2026 20:00:00  krbtgt/R@R`) and the Heimdal
//! layout (`Oct 19 10:00:00 2026  Oct 19 20:00:00 2026  krbtgt/R@R`).

use std::time::Duration;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};

const DATE_FORMATS: &[&str] = &[
    // Two-digit years first: `%Y` would happily read "26" as year 26.
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%b %d %H:%M:%S %Y",
    "%d %b %Y %H:%M:%S",
];

/// The ticket-granting ticket as listed in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketInfo {
    pub default_principal: Option<String>,
    pub server: String,
    pub starts: NaiveDateTime,
    pub expires: NaiveDateTime,
    pub renew_until: Option<NaiveDateTime>,
    pub flags: Option<String>,
}

impl TicketInfo {
    pub fn renewable(&self) -> bool {
        self.flags.as_deref().is_some_and(|f| f.contains('R')) || self.renew_until.is_some()
    }
}

/// Parse `klist -f` output and return the `krbtgt/` ticket.
pub fn parse(output: &str) -> Result<TicketInfo> {
    let default_principal = output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Default principal:"))
        .or_else(|| output.lines().find_map(|l| l.trim().strip_prefix("Principal:")))
        .map(|p| p.trim().to_string());

    let mut lines = output.lines().peekable();
    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        let Some(server) = trimmed.split_whitespace().last() else {
            continue;
        };
        if !server.starts_with("krbtgt/") {
            continue;
        }

        let (starts, expires) = parse_time_pair(&trimmed[..trimmed.len() - server.len()])?;
        let mut info = TicketInfo {
            default_principal,
            server: server.to_string(),
            starts,
            expires,
            renew_until: None,
            flags: None,
        };

        // Continuation lines belong to this ticket until the next ticket line.
        while let Some(next) = lines.peek() {
            let detail = next.trim();
            if !next.starts_with(char::is_whitespace) || detail.is_empty() {
                break;
            }
            parse_detail(detail, &mut info)?;
            lines.next();
        }
        return Ok(info);
    }

    Err(Error::Parse("no krbtgt ticket in cache listing".into()))
}

/// Time left between `now` and `expires`, `None` if already past.
pub fn remaining(expires: NaiveDateTime, now: NaiveDateTime) -> Option<Duration> {
    (expires - now).to_std().ok().filter(|d| !d.is_zero())
}

fn parse_detail(detail: &str, info: &mut TicketInfo) -> Result<()> {
    for part in detail.split(',') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("renew until") {
            info.renew_until = Some(parse_time(rest.trim())?);
        } else if let Some(rest) = part.strip_prefix("Flags:") {
            info.flags = Some(rest.trim().to_string());
        }
    }
    Ok(())
}

fn parse_time_pair(text: &str) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() % 2 != 0 {
        return Err(Error::Parse(format!("unexpected ticket times: {text:?}")));
    }
    let half = tokens.len() / 2;
    let starts = parse_time(&tokens[..half].join(" "))?;
    let expires = parse_time(&tokens[half..].join(" "))?;
    Ok((starts, expires))
}

fn parse_time(text: &str) -> Result<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .ok_or_else(|| Error::Parse(format!("unrecognized timestamp: {text:?}")))
}
