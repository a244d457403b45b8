//! Pure merge of transcript, speaker breakdown and extracted metadata into
//! one canonical record.
//!
//! Deterministic by construction: the caller supplies the extraction
//! timestamp, so identical inputs always produce an identical record.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::domain::{
    format_duration_display, parse_duration_minutes, CanonicalRecord, ExtractedMetadata,
    Participant, RecordQuestion, RecordStatus, TranscriptResult, Utterance, WorkItem,
};

/// Question preview cap, in characters.
const QUESTION_PREVIEW_CHARS: usize = 150;

/// Lead words that mark an utterance as a question candidate even without a
/// question mark.
const QUESTION_LEADS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "which", "can", "could", "would", "should",
    "do", "does", "did", "is", "are", "will",
];

#[derive(Debug, Error)]
pub enum MergeError {
    /// A record must never carry `status = extracted` with no transcript
    #[error("transcript text is empty")]
    EmptyTranscript,
}

/// Merge the stage outputs for one item into a canonical record.
pub fn merge(
    item: &WorkItem,
    transcript: &TranscriptResult,
    metadata: Option<&ExtractedMetadata>,
    fallback_duration_seconds: Option<f64>,
    extracted_at: DateTime<Utc>,
) -> Result<CanonicalRecord, MergeError> {
    if transcript.text.trim().is_empty() {
        return Err(MergeError::EmptyTranscript);
    }

    let title = metadata
        .and_then(|m| m.title.clone())
        .unwrap_or_else(|| item.title.clone());

    let date = metadata.and_then(|m| m.recorded_at.clone());
    let date_formatted = date.as_deref().and_then(derive_iso_date);

    let duration = metadata
        .and_then(|m| m.duration_display.clone())
        .or_else(|| fallback_duration_seconds.map(format_duration_display));
    let duration_minutes = duration.as_deref().and_then(parse_duration_minutes);

    let host_name = metadata.and_then(|m| m.host_name.clone());
    let company_domain = metadata
        .and_then(|m| m.host_email.as_deref())
        .and_then(domain_of_email);

    let participant_names: &[String] = metadata
        .map(|m| m.participant_names.as_slice())
        .unwrap_or(&[]);
    let participants = map_speakers(
        &transcript.utterances,
        participant_names,
        host_name.as_deref(),
    );

    Ok(CanonicalRecord {
        id: item.id.clone(),
        url: item.url.clone(),
        share_url: metadata.and_then(|m| m.share_url.clone()),
        title,
        date,
        date_formatted,
        duration,
        duration_minutes,
        host_name,
        company_domain,
        participants,
        summary: metadata.map(|m| m.summary.clone()).unwrap_or_default(),
        questions: detect_questions(&transcript.utterances),
        transcript_text: transcript.text.clone(),
        extracted_at,
        status: RecordStatus::Extracted,
    })
}

/// Derive a `%Y-%m-%d` date from whatever the page displayed.
fn derive_iso_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
        return Some(raw.to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%B %d, %Y") {
        return Some(date.format("%Y-%m-%d").to_string());
    }

    None
}

fn domain_of_email(email: &str) -> Option<String> {
    email
        .split_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|domain| !domain.is_empty())
}

/// Map diarized speaker ids to display names by order of first appearance.
///
/// Best-effort: assumes the page lists participants in speaking order. When
/// names run out the placeholder is `Speaker <n>`; extracted names beyond
/// the diarized speakers are kept with their position as the speaker id.
fn map_speakers(
    utterances: &[Utterance],
    names: &[String],
    host_name: Option<&str>,
) -> Vec<Participant> {
    let mut speaker_order: Vec<&str> = Vec::new();
    for utterance in utterances {
        if !speaker_order.contains(&utterance.speaker.as_str()) {
            speaker_order.push(&utterance.speaker);
        }
    }

    let mut participants: Vec<Participant> = speaker_order
        .iter()
        .enumerate()
        .map(|(i, speaker_id)| {
            let name = names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("Speaker {}", i + 1));
            Participant {
                speaker_id: (*speaker_id).to_string(),
                is_host: host_name == Some(name.as_str()),
                name,
            }
        })
        .collect();

    for (i, name) in names.iter().enumerate().skip(speaker_order.len()) {
        participants.push(Participant {
            speaker_id: (i + 1).to_string(),
            name: name.clone(),
            is_host: host_name == Some(name.as_str()),
        });
    }

    participants
}

/// Detect question candidates: interrogative punctuation anywhere, or a
/// known lead word opening the utterance.
fn detect_questions(utterances: &[Utterance]) -> Vec<RecordQuestion> {
    utterances
        .iter()
        .filter_map(|utterance| {
            let text = utterance.text.trim();
            if text.is_empty() || !is_question(text) {
                return None;
            }
            Some(RecordQuestion {
                speaker_id: Some(utterance.speaker.clone()),
                question: preview(text),
            })
        })
        .collect()
}

fn is_question(text: &str) -> bool {
    if text.contains('?') {
        return true;
    }

    let first_word: String = text
        .chars()
        .skip_while(|c| !c.is_alphanumeric())
        .take_while(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();

    QUESTION_LEADS.contains(&first_word.as_str())
}

/// First 150 characters, with an ellipsis marker when truncated.
fn preview(text: &str) -> String {
    if text.chars().count() <= QUESTION_PREVIEW_CHARS {
        return text.to_string();
    }

    let mut capped: String = text.chars().take(QUESTION_PREVIEW_CHARS).collect();
    capped.push_str("...");
    capped
}
