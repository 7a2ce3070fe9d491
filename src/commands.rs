use anyhow::Context;
use chrono::{Datelike, NaiveDate, Weekday};
use clap::ArgMatches;
use log::{debug, info};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use taskmate::calendar::{iso_weekday, PendingChangeSet};
use taskmate::config::Config;
use taskmate::error::ApiError;
use taskmate::http::ApiClient;
use taskmate::rate_limit::RateLimitCoordinator;
use taskmate::types::RateLimitState;
use taskmate::upload::{UploadCandidate, UploadPolicy};

fn print_json(v: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(v)?);
    Ok(())
}

fn fail(e: &ApiError, extra: Value) -> anyhow::Result<ExitCode> {
    let mut out = json!({
        "error": { "code": e.code(), "message": e.to_string(), "retriable": e.retriable() }
    });
    if let (Some(obj), Value::Object(extra)) = (out.as_object_mut(), extra) {
        obj.extend(extra);
    }
    print_json(&out)?;
    Ok(ExitCode::FAILURE)
}

pub async fn run(name: &str, m: &ArgMatches) -> anyhow::Result<ExitCode> {
    if name == "validate-upload" {
        return validate_upload(m);
    }

    let cfg = Config::from_env().context("loading configuration")?;
    let year = m.get_one::<i32>("year").copied().context("missing --year")?;
    let dealership_id = m.get_one::<u64>("dealership").copied().or(cfg.dealership_id);

    if name == "toggle" {
        // Each date is checked against this year's baseline only.
        for date in m.get_many::<NaiveDate>("date").into_iter().flatten() {
            if date.year() != year {
                anyhow::bail!("--date {} is outside --year {}", date, year);
            }
        }
    }

    let rate = Arc::new(RateLimitCoordinator::try_current(cfg.toast_debounce())?);
    // Stand-in for the on-screen indicator.
    let _indicator = rate.subscribe(|s: &RateLimitState| match s.indicator_text() {
        Some(text) => debug!("{}", text),
        None => debug!("Rate limit cleared"),
    });
    let client = ApiClient::new(cfg, rate.clone())?;

    let server = match client.fetch_holidays(year, dealership_id).await {
        Ok(s) => s,
        Err(e) => return fail(&e, json!({ "year": year })),
    };
    debug!("Fetched {} server holidays for {}", server.len(), year);

    let mut pending = PendingChangeSet::new();
    match name {
        "holidays" => {
            print_json(&json!({
                "year": year,
                "dealership_id": dealership_id,
                "holidays": server,
            }))?;
            return Ok(ExitCode::SUCCESS);
        }
        "toggle" => {
            for date in m.get_many::<NaiveDate>("date").into_iter().flatten() {
                pending.toggle(*date, server.contains(date));
            }
        }
        "mark-weekdays" => {
            let weekdays: Vec<Weekday> = m
                .get_many::<u32>("weekday")
                .into_iter()
                .flatten()
                .filter_map(|n| iso_weekday(*n))
                .collect();
            pending.bulk_add_weekdays(year, &weekdays, &server);
        }
        "clear-year" => pending.clear_year(&server),
        other => anyhow::bail!("unknown command: {}", other),
    }

    let dry_run = m.get_flag("dry-run");
    save(&client, year, dealership_id, &server, pending, dry_run).await
}

async fn save(
    client: &ApiClient,
    year: i32,
    dealership_id: Option<u64>,
    server: &BTreeSet<NaiveDate>,
    mut pending: PendingChangeSet,
    dry_run: bool,
) -> anyhow::Result<ExitCode> {
    let effective = pending.effective_holiday_set(server);
    let staged = pending.len();
    if dry_run || !pending.is_dirty() {
        let batch = pending.commit();
        print_json(&json!({
            "year": year,
            "pending": staged,
            "effective_holidays": effective,
            "requests": batch.clone().into_requests(year, dealership_id),
            "batch": batch,
            "saved": false,
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    match client.save_pending(year, dealership_id, &mut pending).await {
        Ok(batch) => {
            info!("Saved {} calendar changes for {}", staged, year);
            print_json(&json!({
                "year": year,
                "pending": pending.len(),
                "effective_holidays": effective,
                "batch": batch,
                "saved": true,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => fail(
            &e,
            json!({
                "year": year,
                "pending": pending.len(),
                "rate_limit": client.rate_limit().state(),
            }),
        ),
    }
}

fn validate_upload(m: &ArgMatches) -> anyhow::Result<ExitCode> {
    let mut files = Vec::new();
    for path in m.get_many::<PathBuf>("files").into_iter().flatten() {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(UploadCandidate {
            name,
            size: meta.len(),
            mime_type: None,
        });
    }

    let errors: Vec<String> = match UploadPolicy::default().validate(&files) {
        Ok(()) => Vec::new(),
        Err(errs) => errs.iter().map(|e| e.to_string()).collect(),
    };
    print_json(&json!({ "ok": errors.is_empty(), "files": files.len(), "errors": errors }))?;
    Ok(if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
