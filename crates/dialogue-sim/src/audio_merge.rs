//! Stereo merge of rendered clips.
//!
//! Walks the full transcript of each rendered dialogue, takes the next clip
//! for the speaking side and lays it end to end: initiator on the left
//! channel, responder on the right. Writes
//!
//! ```text
//! {out}/{tts_id}/merged.wav
//! {out}/{tts_id}/config.json   (segment timings + termination provenance)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use coordination::dialogue::{DialogueResult, Speaker, Terminator};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::completion::SentinelPolicy;
use crate::errors::SimError;

/// One clip's place in the merged track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSegment {
    pub role: Speaker,
    pub content: String,
    pub start_time: String,
    pub end_time: String,
    pub start_time_seconds: f64,
    pub end_time_seconds: f64,
}

/// Contents of `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeManifest {
    pub audio_segments: Vec<AudioSegment>,
    pub terminated_by_manager: bool,
    pub end_call_signal_detected: bool,
    pub termination_reason: String,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged { segments: usize, duration_secs: f64 },
    /// The transcript carries a failure sentinel.
    SkippedSentinel,
    /// No full transcript exists for the clip directory.
    SkippedNoTranscript,
}

#[derive(Debug)]
pub struct MergeReport {
    pub id: String,
    pub result: Result<MergeOutcome, SimError>,
}

/// `MM:SS.mmm`
pub fn format_timestamp(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor();
    let rest = seconds - minutes * 60.0;
    format!("{:02}:{:06.3}", minutes as u64, rest)
}

/// `*.wav` files of `dir` ordered by their numeric stem.
pub fn sorted_clips(dir: &Path) -> Result<Vec<PathBuf>, SimError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SimError::io(dir, e)),
    };
    let mut clips: Vec<(usize, PathBuf)> = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| SimError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("wav") {
            continue;
        }
        if let Some(n) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<usize>().ok())
        {
            clips.push((n, path));
        }
    }
    clips.sort_by_key(|(n, _)| *n);
    Ok(clips.into_iter().map(|(_, p)| p).collect())
}

/// A clip downmixed to mono 16-bit.
struct Clip {
    sample_rate: u32,
    samples: Vec<i16>,
}

fn audio_err(path: &Path, err: hound::Error) -> SimError {
    SimError::Audio(format!("{}: {err}", path.display()))
}

fn read_clip(path: &Path) -> Result<Clip, SimError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| audio_err(path, e))?;
    let spec = reader.spec();
    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| audio_err(path, e))?,
        (hound::SampleFormat::Int, bits) => {
            let samples: Vec<i32> = reader
                .samples::<i32>()
                .collect::<Result<_, _>>()
                .map_err(|e| audio_err(path, e))?;
            samples
                .into_iter()
                .map(|s| {
                    if bits > 16 {
                        (s >> (bits - 16)) as i16
                    } else {
                        (s << (16 - bits)) as i16
                    }
                })
                .collect()
        }
        (hound::SampleFormat::Float, _) => {
            let samples: Vec<f32> = reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| audio_err(path, e))?;
            samples
                .into_iter()
                .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .collect()
        }
    };
    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect()
    };
    Ok(Clip {
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Merge one dialogue's clips into `out_dir/{id}`.
pub fn merge_dialogue(
    clip_dir: &Path,
    result: &DialogueResult,
    sentinels: &SentinelPolicy,
    out_dir: &Path,
) -> Result<MergeOutcome, SimError> {
    if let Some(marker) = result
        .history
        .utterances()
        .iter()
        .find_map(|u| sentinels.find(&u.content))
    {
        info!(id = %result.id, marker, "Transcript carries a failure sentinel, skipping");
        return Ok(MergeOutcome::SkippedSentinel);
    }

    let left = sorted_clips(&clip_dir.join(Speaker::Initiator.side()))?;
    let right = sorted_clips(&clip_dir.join(Speaker::Responder.side()))?;
    let mut next = [0usize; 2];

    let mut sample_rate: Option<u32> = None;
    let mut frames: Vec<[i16; 2]> = Vec::new();
    let mut segments = Vec::new();

    for (i, utterance) in result.history.utterances().iter().enumerate() {
        let (clips, slot) = match utterance.role {
            Speaker::Initiator => (&left, 0),
            Speaker::Responder => (&right, 1),
        };
        let Some(path) = clips.get(next[slot]) else {
            warn!(
                id = %result.id,
                line = i,
                side = utterance.role.side(),
                "No clip left for line, skipping"
            );
            continue;
        };
        next[slot] += 1;

        let clip = read_clip(path)?;
        let rate = *sample_rate.get_or_insert(clip.sample_rate);
        if clip.sample_rate != rate {
            return Err(SimError::Audio(format!(
                "{}: sample rate {} does not match {rate}",
                path.display(),
                clip.sample_rate
            )));
        }

        let start = frames.len() as f64 / rate as f64;
        frames.extend(clip.samples.iter().map(|&s| match utterance.role {
            Speaker::Initiator => [s, 0],
            Speaker::Responder => [0, s],
        }));
        let end = frames.len() as f64 / rate as f64;
        debug!(id = %result.id, clip = %path.display(), start, end, "Clip placed");

        segments.push(AudioSegment {
            role: utterance.role,
            content: utterance.content.clone(),
            start_time: format_timestamp(start),
            end_time: format_timestamp(end),
            start_time_seconds: start,
            end_time_seconds: end,
        });
    }

    let Some(rate) = sample_rate else {
        return Err(SimError::Audio(format!(
            "no clips found under {}",
            clip_dir.display()
        )));
    };

    let target = out_dir.join(&result.id);
    std::fs::create_dir_all(&target).map_err(|e| SimError::io(&target, e))?;

    let wav_path = target.join("merged.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&wav_path, spec).map_err(|e| audio_err(&wav_path, e))?;
    for [l, r] in &frames {
        writer.write_sample(*l).map_err(|e| audio_err(&wav_path, e))?;
        writer.write_sample(*r).map_err(|e| audio_err(&wav_path, e))?;
    }
    writer.finalize().map_err(|e| audio_err(&wav_path, e))?;

    let duration_secs = frames.len() as f64 / rate as f64;
    let manifest = MergeManifest {
        audio_segments: segments,
        terminated_by_manager: result.terminated_by_manager,
        end_call_signal_detected: result.end_call_signal_detected,
        termination_reason: result.termination_reason.clone(),
        terminator: result.terminator,
    };
    let manifest_path = target.join("config.json");
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .map_err(|e| SimError::io(&manifest_path, e))?;

    info!(
        id = %result.id,
        segments = manifest.audio_segments.len(),
        duration_secs,
        "Merged dialogue audio"
    );
    Ok(MergeOutcome::Merged {
        segments: manifest.audio_segments.len(),
        duration_secs,
    })
}

fn merge_directory(
    clip_dir: &Path,
    transcripts_dir: &Path,
    sentinels: &SentinelPolicy,
    out_dir: &Path,
    id: &str,
) -> Result<MergeOutcome, SimError> {
    let transcript_path = transcripts_dir.join(format!("{id}.json"));
    let text = match std::fs::read_to_string(&transcript_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(id, "No full transcript for rendered dialogue, skipping");
            return Ok(MergeOutcome::SkippedNoTranscript);
        }
        Err(e) => return Err(SimError::io(&transcript_path, e)),
    };
    let result: DialogueResult = serde_json::from_str(&text)?;
    merge_dialogue(clip_dir, &result, sentinels, out_dir)
}

/// Merge every dialogue directory under `clips_root` on blocking threads,
/// at most `workers` at a time. Reports come back sorted by id.
pub async fn merge_all(
    clips_root: &Path,
    transcripts_dir: &Path,
    out_dir: &Path,
    sentinels: SentinelPolicy,
    workers: usize,
) -> Result<Vec<MergeReport>, SimError> {
    let mut ids = Vec::new();
    let entries = std::fs::read_dir(clips_root).map_err(|e| SimError::io(clips_root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SimError::io(clips_root, e))?;
        if entry.path().is_dir() {
            ids.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    ids.sort();
    info!(dialogues = ids.len(), workers, "Merging rendered dialogues");

    let sem = Arc::new(Semaphore::new(workers.max(1)));
    let sentinels = Arc::new(sentinels);
    let mut join_set = JoinSet::new();
    for id in ids {
        let sem = sem.clone();
        let sentinels = sentinels.clone();
        let clip_dir = clips_root.join(&id);
        let transcripts_dir = transcripts_dir.to_path_buf();
        let out_dir = out_dir.to_path_buf();
        join_set.spawn(async move {
            let _permit = sem.acquire_owned().await;
            let task_id = id.clone();
            let result = tokio::task::spawn_blocking(move || {
                merge_directory(&clip_dir, &transcripts_dir, &sentinels, &out_dir, &task_id)
            })
            .await
            .unwrap_or_else(|e| Err(SimError::Audio(format!("merge worker panicked: {e}"))));
            MergeReport { id, result }
        });
    }

    let mut reports = Vec::new();
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok(report) => {
                if let Err(e) = &report.result {
                    warn!(id = %report.id, error = %e, "Merge failed");
                }
                reports.push(report);
            }
            Err(e) => warn!(error = %e, "merge task panicked"),
        }
    }
    reports.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use coordination::dialogue::Transcript;

    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, value: i16, frames: usize) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn result(lines: &[(Speaker, &str)]) -> DialogueResult {
        let mut history = Transcript::new();
        for (speaker, text) in lines {
            history.push(*speaker, *text);
        }
        DialogueResult {
            id: "tts_fraud_00003".into(),
            history,
            turn_count: 1,
            terminated_by_manager: true,
            end_call_signal_detected: false,
            termination_reason: "Callee refused.".into(),
            terminator: Terminator::Responder,
            conclusion_messages: Vec::new(),
            reached_max_turns: false,
            fallback_decisions: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn timestamps_are_minute_padded() {
        assert_eq!(format_timestamp(0.0), "00:00.000");
        assert_eq!(format_timestamp(75.25), "01:15.250");
    }

    #[test]
    fn clips_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for n in [10, 2, 1] {
            write_wav(&dir.path().join(format!("{n}.wav")), 8000, 1, 4);
        }
        std::fs::write(dir.path().join("voices.json"), "{}").unwrap();
        let names: Vec<String> = sorted_clips(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1.wav", "2.wav", "10.wav"]);
    }

    #[test]
    fn merges_in_transcript_order_with_panning() {
        let clips = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_wav(&clips.path().join("left/0.wav"), 8000, 100, 8000);
        write_wav(&clips.path().join("right/0.wav"), 8000, 200, 4000);
        write_wav(&clips.path().join("left/1.wav"), 8000, 300, 8000);

        let dialogue = result(&[
            (Speaker::Initiator, "Hello."),
            (Speaker::Responder, "Who is this?"),
            (Speaker::Initiator, "Your bank."),
        ]);
        let outcome = merge_dialogue(
            clips.path(),
            &dialogue,
            &SentinelPolicy::new(["API call failed"]),
            out.path(),
        )
        .unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                segments: 3,
                duration_secs: 2.5
            }
        );

        let target = out.path().join("tts_fraud_00003");
        let manifest: MergeManifest =
            serde_json::from_str(&std::fs::read_to_string(target.join("config.json")).unwrap())
                .unwrap();
        let seg = &manifest.audio_segments;
        assert_eq!(seg[1].role, Speaker::Responder);
        assert_eq!(seg[1].start_time, "00:01.000");
        assert_eq!(seg[1].end_time, "00:01.500");
        assert_eq!(seg[2].end_time_seconds, 2.5);
        assert_eq!(manifest.terminator, Terminator::Responder);

        let mut reader = hound::WavReader::open(target.join("merged.wav")).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(&samples[..2], &[100, 0]);
        assert_eq!(&samples[16000..16002], &[0, 200]);
    }

    #[test]
    fn sample_rate_mismatch_is_rejected() {
        let clips = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_wav(&clips.path().join("left/0.wav"), 8000, 1, 10);
        write_wav(&clips.path().join("right/0.wav"), 16000, 1, 10);
        let dialogue = result(&[(Speaker::Initiator, "Hi."), (Speaker::Responder, "Hi.")]);
        let err = merge_dialogue(clips.path(), &dialogue, &SentinelPolicy::new(["x"]), out.path())
            .unwrap_err();
        assert!(matches!(err, SimError::Audio(_)));
    }

    #[test]
    fn sentinel_transcripts_are_skipped() {
        let clips = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dialogue = result(&[(Speaker::Initiator, "API call failed")]);
        let outcome = merge_dialogue(
            clips.path(),
            &dialogue,
            &SentinelPolicy::new(["API call failed"]),
            out.path(),
        )
        .unwrap();
        assert_eq!(outcome, MergeOutcome::SkippedSentinel);
        assert!(!out.path().join("tts_fraud_00003").exists());
    }

    #[tokio::test]
    async fn merge_all_reports_missing_transcripts() {
        let clips = tempfile::tempdir().unwrap();
        let transcripts = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        write_wav(&clips.path().join("tts_fraud_00003/left/0.wav"), 8000, 5, 80);
        write_wav(&clips.path().join("tts_fraud_00004/left/0.wav"), 8000, 5, 80);
        let dialogue = result(&[(Speaker::Initiator, "Hello.")]);
        std::fs::write(
            transcripts.path().join("tts_fraud_00003.json"),
            serde_json::to_string(&dialogue).unwrap(),
        )
        .unwrap();

        let reports = merge_all(
            clips.path(),
            transcripts.path(),
            out.path(),
            SentinelPolicy::new(["API call failed"]),
            2,
        )
        .await
        .unwrap();
        assert_eq!(reports.len(), 2);
        assert!(matches!(
            reports[0].result,
            Ok(MergeOutcome::Merged { segments: 1, .. })
        ));
        assert!(matches!(
            reports[1].result,
            Ok(MergeOutcome::SkippedNoTranscript)
        ));
    }
}
