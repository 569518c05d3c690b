//! Import of the legacy `users.json` export.
//!
//! The file is a JSON array of `{handle, did, followers, savedOn}` objects.
//! Extra fields such as `followed` are honored when present.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::CandidateAccount;
use crate::error::Result;
use crate::store::traits::AccountStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedUser {
    pub handle: String,
    #[serde(default)]
    pub did: String,
    #[serde(default)]
    pub followers: i64,
    #[serde(default)]
    pub saved_on: Option<String>,
    #[serde(default)]
    pub followed: bool,
}

/// Counts from one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub read: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Read an export file. A missing file reads as empty.
pub fn read_export(path: &Path) -> Result<Vec<ExportedUser>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("No export at {}, nothing to import", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&data)?)
}

/// Merge an export file into the store.
///
/// Existing accounts keep their attempts, priority and followed state; the
/// follower count and identity are refreshed from the file.
pub fn import_json(store: &dyn AccountStore, path: &Path, now: DateTime<Utc>) -> Result<ImportReport> {
    let users = read_export(path)?;
    let mut report = ImportReport {
        read: users.len(),
        ..Default::default()
    };

    for user in users {
        let handle = user.handle.trim();
        if handle.is_empty() {
            report.skipped += 1;
            continue;
        }

        let saved_on = user.saved_on.as_deref().and_then(parse_saved_on).unwrap_or(now);
        let followers = user.followers.max(0) as u64;

        let account = match store.get(handle)? {
            Some(mut existing) => {
                existing.follower_count = followers;
                if !user.did.is_empty() {
                    existing.identity = user.did.clone();
                }
                report.updated += 1;
                existing
            }
            None => {
                report.created += 1;
                let mut account = CandidateAccount::new(handle, followers, saved_on).with_identity(user.did.clone());
                account.assign_priority();
                account
            }
        };

        let mut account = account;
        if user.followed && !account.followed {
            account.mark_followed(now);
        }
        store.upsert(&account)?;
    }

    log::info!(
        "Imported {} users from {} ({} new, {} updated, {} skipped)",
        report.read,
        path.display(),
        report.created,
        report.updated,
        report.skipped
    );
    Ok(report)
}

fn parse_saved_on(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}
