// Transcript post-processing for the Whisper-AT API
//
// Whisper hallucinates boilerplate on silence ("thank you for watching",
// runs of dots) and happily transcribes hold music and dial tones. This
// module cleans the raw engine output before it goes to the client: drops
// non-speech segments, suppresses text the model itself flagged as
// non-speech, substitutes a fixed marker for telephony signal tones and
// strips known hallucinated phrases.

use std::collections::HashSet;

use lazy_static::lazy_static;

use crate::models::{TranscriptionResult, TranscriptionSegment};

/// Segments whose no-speech probability exceeds this are dropped from the
/// response entirely
pub const SEGMENT_NO_SPEECH_CUTOFF: f64 = 0.55;

/// Replacement transcript when telephony signal tones dominate the audio
pub const SIGNAL_TONE_TEXT: &str = "DIAL TONE";

lazy_static! {
    /// Phrases Whisper produces out of thin air on silent or noisy input.
    /// Matched against the normalized form of the full transcript.
    static ref BOILERPLATE_PHRASES: HashSet<&'static str> = [
        "thank you",
        "thanks for watching",
        "thank you for watching",
        "so",
        "the",
        "you",
        "oh",
        "bye bye",
    ]
    .iter()
    .copied()
    .collect();

    /// Audio-tag labels indicating telephony signal tones rather than speech
    static ref SIGNAL_TONE_LABELS: HashSet<&'static str> = [
        "Telephone",
        "Telephone bell ringing",
        "Ringtone",
        "Telephone dialing, DTMF",
        "Dial tone",
        "Busy signal",
        "Alarm clock",
        "Siren",
        "Civil defense siren",
        "Buzzer",
        "Tearing",
        "Beep, bleep",
        "Ping",
        "Sine wave",
        "Echo",
        "Sidetone",
        "Sound effect",
        "Cowbell",
        "Vibraphone",
    ]
    .iter()
    .copied()
    .collect();
}

/// Reduce text to a canonical comparison form: ASCII letters, digits,
/// basic punctuation; collapsed whitespace; lowercase.
pub fn normalize_text(text: &str) -> String {
    let kept: String = text
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '.' | ',' | '\'') || c.is_ascii_whitespace()
        })
        .collect();
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Empty out transcripts that are known hallucinations: dots-only output,
/// runs of three or more dots, or an exact boilerplate phrase. Anything
/// else passes through unmodified.
pub fn strip_hallucinations(text: &str) -> String {
    let norm = normalize_text(text);
    if norm.is_empty() {
        return String::new();
    }
    if norm.chars().all(|c| c == '.') || norm.contains("...") {
        return String::new();
    }
    if BOILERPLATE_PHRASES.contains(norm.as_str()) {
        return String::new();
    }
    text.to_string()
}

/// Clean a raw engine result for delivery.
///
/// `no_speech_threshold` is the request's parameter: when the leading
/// segment's no-speech probability reaches it, the transcript is suppressed
/// even though segments and tags are still reported.
pub fn post_process(result: TranscriptionResult, no_speech_threshold: f64) -> TranscriptionResult {
    let TranscriptionResult {
        segments,
        audio_tags,
        ..
    } = result;

    let leading_no_speech = segments
        .first()
        .map(|s| s.no_speech_prob >= no_speech_threshold)
        .unwrap_or(false);

    let retained: Vec<TranscriptionSegment> = segments
        .into_iter()
        .filter(|s| s.no_speech_prob <= SEGMENT_NO_SPEECH_CUTOFF)
        .collect();

    let tone_detected = audio_tags
        .iter()
        .any(|tag| SIGNAL_TONE_LABELS.contains(tag.label.as_str()));

    let text = if tone_detected {
        SIGNAL_TONE_TEXT.to_string()
    } else if leading_no_speech {
        String::new()
    } else {
        let joined = retained
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        strip_hallucinations(&joined)
    };

    TranscriptionResult {
        text,
        segments: retained,
        audio_tags,
    }
}
