use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use unitsel::report::{aggregate_reports, compute_utterance_report, failed_utterance_report, Meta};
use unitsel::{
    AudioBuffer, AudioFormat, InMemoryDatabase, SelectionConfig, SelectionReport,
    SynthesizerBuilder, TargetSequence, Unit, UnitDatabase,
};

#[path = "selection_report/json_report_formatter.rs"]
mod json_report_formatter;
#[path = "selection_report/recording_reader.rs"]
mod recording_reader;
#[path = "selection_report/text_report_formatter.rs"]
mod text_report_formatter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Parser)]
#[command(name = "selection_report")]
#[command(about = "Synthesize utterances from a unit database and report the selected units")]
struct Args {
    /// Voice manifest: recordings plus unit annotations.
    #[arg(long, env = "UNITSEL_REPORT_VOICE")]
    voice: PathBuf,
    /// JSON list of `{ "id": ..., "targets": [...] }` utterances.
    #[arg(long, env = "UNITSEL_REPORT_UTTERANCES")]
    utterances: PathBuf,
    #[arg(long, env = "UNITSEL_REPORT_CONFIG")]
    config: Option<PathBuf>,
    /// Directory for one WAV file per synthesized utterance.
    #[arg(long, env = "UNITSEL_REPORT_WAV_DIR")]
    wav_dir: Option<PathBuf>,
    /// Report path; the text report goes to stdout when omitted.
    #[arg(long, env = "UNITSEL_REPORT_OUT")]
    out: Option<PathBuf>,
    #[arg(
        long,
        env = "UNITSEL_REPORT_FORMAT",
        value_enum,
        default_value_t = OutputFormat::Json
    )]
    output_format: OutputFormat,
    #[arg(long, env = "UNITSEL_REPORT_BEAM_WIDTH")]
    beam_width: Option<usize>,
    #[arg(long, env = "UNITSEL_REPORT_THREADS")]
    threads: Option<usize>,
    #[arg(long, env = "UNITSEL_REPORT_LIMIT")]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct VoiceManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sample_rate_hz: Option<u32>,
    /// WAV or FLAC files; `Unit::source` indexes this list.
    recordings: Vec<PathBuf>,
    units: Vec<Unit>,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    id: String,
    targets: TargetSequence,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => SelectionConfig::load(path)
            .map_err(|err| format!("Failed to load config '{}': {err}", path.display()))?,
        None => SelectionConfig::default(),
    };
    if let Some(beam_width) = args.beam_width {
        config.search.beam_width = beam_width;
    }
    if let Some(threads) = args.threads {
        config.search.threads = threads;
    }

    let (voice_name, database) = load_voice(&args.voice)?;
    let mut utterances = load_utterances(&args.utterances)?;
    if let Some(limit) = args.limit {
        utterances.truncate(limit);
    }
    if utterances.is_empty() {
        return Err("No utterances selected after applying --limit.".to_string());
    }

    let sample_rate_hz = database.format().sample_rate_hz;
    let unit_count = database.len();
    let synthesizer = SynthesizerBuilder::new(config.clone())
        .build(database)
        .map_err(|err| format!("Failed to build synthesizer: {err}"))?;

    if let Some(dir) = args.wav_dir.as_ref() {
        fs::create_dir_all(dir)
            .map_err(|err| format!("Failed to create WAV directory '{}': {err}", dir.display()))?;
    }

    let progress = ProgressBar::new(utterances.len() as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    progress.set_message("starting...");

    let started = Instant::now();
    let mut reports = Vec::with_capacity(utterances.len());
    for utterance in &utterances {
        progress.set_message(utterance.id.clone());
        match synthesizer.synthesize(&utterance.targets) {
            Ok(output) => {
                if let Some(dir) = args.wav_dir.as_ref() {
                    let path = dir.join(format!("{}.wav", sanitize_file_stem(&utterance.id)));
                    write_wav(&path, &output.audio)?;
                }
                reports.push(compute_utterance_report(
                    &utterance.id,
                    &utterance.targets,
                    &output,
                ));
            }
            Err(err) => {
                progress.println(format!("{}: synthesis failed: {err}", utterance.id));
                reports.push(failed_utterance_report(
                    &utterance.id,
                    &utterance.targets,
                    &err,
                ));
            }
        }
        progress.inc(1);
    }
    progress.finish_with_message("done");
    eprintln!(
        "synthesized {} utterance(s) in {:.2}s",
        reports.len(),
        started.elapsed().as_secs_f64()
    );

    let aggregates = aggregate_reports(&reports);
    let report = SelectionReport {
        schema_version: unitsel::report::SCHEMA_VERSION,
        meta: Meta {
            generated_at: Utc::now().to_rfc3339(),
            voice: voice_name,
            sample_rate_hz,
            unit_count,
            beam_width: config.search.beam_width,
            max_candidates: config.search.max_candidates,
            utterance_count: reports.len(),
        },
        utterances: reports,
        aggregates,
    };

    match args.output_format {
        OutputFormat::Json => {
            let out_path = args.out.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "selection-report-{}.json",
                    Utc::now().format("%Y%m%dT%H%M%SZ")
                ))
            });
            json_report_formatter::write_report(&out_path, &report)?;
            println!("{}", out_path.display());
        }
        OutputFormat::Text => {
            let text = text_report_formatter::render(&report);
            match args.out.as_ref() {
                Some(path) => json_report_formatter::write_staged(path, &text)?,
                None => print!("{text}"),
            }
        }
    }
    Ok(())
}

fn load_voice(path: &Path) -> Result<(String, Arc<dyn UnitDatabase>), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read voice manifest '{}': {err}", path.display()))?;
    let manifest: VoiceManifest = serde_json::from_str(&contents)
        .map_err(|err| format!("Failed to parse voice manifest '{}': {err}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut sample_rate_hz = manifest.sample_rate_hz;
    let mut recordings = Vec::with_capacity(manifest.recordings.len());
    for recording in &manifest.recordings {
        let file = base.join(recording);
        let recording_reader::Recording {
            sample_rate_hz: rate,
            samples,
        } = recording_reader::read_recording(&file)?;
        match sample_rate_hz {
            Some(expected) if expected != rate => {
                return Err(format!(
                    "Recording '{}' has sample rate {rate} Hz, voice uses {expected} Hz",
                    file.display()
                ));
            }
            Some(_) => {}
            None => sample_rate_hz = Some(rate),
        }
        recordings.push(samples);
    }

    let format = AudioFormat::mono(sample_rate_hz.unwrap_or(AudioFormat::DEFAULT_SAMPLE_RATE_HZ));
    let mut builder = InMemoryDatabase::builder(format);
    for samples in recordings {
        builder.add_recording(samples);
    }
    for unit in manifest.units {
        builder.add_unit(unit);
    }
    let database = builder
        .build()
        .map_err(|err| format!("Invalid voice manifest '{}': {err}", path.display()))?;

    let name = manifest.name.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    Ok((name, Arc::new(database)))
}

fn load_utterances(path: &Path) -> Result<Vec<Utterance>, String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read utterances '{}': {err}", path.display()))?;
    serde_json::from_str(&contents)
        .map_err(|err| format!("Failed to parse utterances '{}': {err}", path.display()))
}

fn write_wav(path: &Path, audio: &AudioBuffer) -> Result<(), String> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.format.sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|err| format!("Failed to create WAV '{}': {err}", path.display()))?;
    for sample in audio.to_pcm16() {
        writer
            .write_sample(sample)
            .map_err(|err| format!("Failed to write WAV '{}': {err}", path.display()))?;
    }
    writer
        .finalize()
        .map_err(|err| format!("Failed to finalize WAV '{}': {err}", path.display()))
}

fn sanitize_file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
