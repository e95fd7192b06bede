// src/utils/jconfig.rs
//! JSON codec shared by every store backend.

use crate::error::StoreError;
use crate::job::Job;
use crate::result::ResultRecord;

pub fn encode_job(job: &Job) -> Result<String, StoreError> {
    Ok(serde_json::to_string(job)?)
}

pub fn decode_job(payload: &str) -> Result<Job, StoreError> {
    Ok(serde_json::from_str(payload)?)
}

pub fn encode_record(record: &ResultRecord) -> Result<String, StoreError> {
    Ok(serde_json::to_string(record)?)
}

pub fn decode_record(payload: &str) -> Result<ResultRecord, StoreError> {
    Ok(serde_json::from_str(payload)?)
}

/// Decodes an entry taken off a queue, keeping what can be salvaged on failure.
pub fn decode_queued_job(raw: String) -> Result<Job, StoreError> {
    match serde_json::from_str(&raw) {
        Ok(job) => Ok(job),
        Err(e) => Err(StoreError::Undecodable {
            job_id: extract_job_id(&raw),
            job_type: extract_job_type(&raw),
            reason: e.to_string(),
            raw,
        }),
    }
}

fn extract_field(payload: &str, field: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(payload).ok()?;
    v.get(field)?.as_str().map(String::from)
}

/// Pulls `job_type` out of a serialized job without decoding the rest.
pub fn extract_job_type(payload: &str) -> Option<String> {
    extract_field(payload, "job_type")
}

pub fn extract_job_id(payload: &str) -> Option<String> {
    extract_field(payload, "id")
}
