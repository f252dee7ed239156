use std::time::Duration;

use log::{debug, info};

use crate::error::IngestError;
use crate::ingest::Receipt;


/// Outcome of one upload request, handed to an [Observer] once the request is finished.
pub struct Report<'a> {
    pub client: &'a str,
    pub elapsed: Duration,
    pub result: &'a Result<Receipt, IngestError>,
}

/// Receives a [Report] after every upload request, successful or not.
pub trait Observer: Send + Sync {
    fn observe(&self, report: &Report<'_>);
}

/// Writes reports to the log.
pub struct LogObserver;

impl Observer for LogObserver {
    fn observe(&self, report: &Report<'_>) {
        let ms = report.elapsed.as_millis();
        match report.result {
            Ok(v) => {
                let secs = report.elapsed.as_secs_f64();
                let rate = match secs > 0.0 {
                    true => hrsize((v.size as f64 / secs) as u64),
                    false => String::from("-"),
                };
                info!("stored {} [{}] for {} in {}ms ({}/s)", v.name, hrsize(v.size), report.client, ms, rate);
            },
            Err(e) => {
                debug!("upload from {} failed after {}ms: {:?}", report.client, ms, e);
            },
        }
    }
}

/// Human readable byte count: `999B`, `1.5KB`, `20KB`, `3.2MB` and so on.
pub fn hrsize(size: u64) -> String {
    if size < 1000 {
        return format!("{}B", size);
    }
    let mut v = size as f64;
    for suffix in ["K", "M", "G", "T", "P", "E", "Z", "Y"] {
        v /= 1024.0;
        if v < 10.0 {
            return format!("{:.1}{}B", v, suffix);
        }
        if v < 1000.0 {
            return format!("{:.0}{}B", v, suffix);
        }
    }
    format!("{:.0}YB", v)
}
