mod capture;
mod config;
mod media;
mod speech;
mod transcribe;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::traits::{Consumer, Split};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;

use rehearse_core::Command;
use rehearse_core::question::FileQuestionSource;
use rehearse_core::session::{Session, SessionAction};
use rehearse_core::voice::{VoiceCoordinator, VoiceEvent};

use crate::capture::CpalCapture;
use crate::config::{Config, OUTPUT_CHUNK_SIZE, OUTPUT_LATENCY_MS};

#[derive(Parser)]
struct Cli {
    /// Path to the question bank (overrides QUESTIONS_FILE)
    #[arg(long)]
    questions: Option<String>,
    /// Input device name (the default input device if omitted)
    #[arg(long)]
    input_device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting rehearse service...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    let questions_file = args
        .questions
        .clone()
        .unwrap_or_else(|| config.questions_file.clone());

    // --- 4. Audio Output Setup ---
    // The output stream plays whatever the speech synthesizer pushes into
    // the shared ring buffer.
    let output = rehearse_native_utils::device::output_device(None)
        .context("Failed to get default audio output device")?;
    tracing::info!("Using output device: {:?}", output.name()?);
    tracing::debug!(
        "Available outputs:\n{}",
        rehearse_native_utils::device::describe_outputs().unwrap_or_default()
    );
    tracing::debug!(
        "Available inputs:\n{}",
        rehearse_native_utils::device::describe_inputs().unwrap_or_default()
    );

    let output_config = output
        .default_output_config()
        .context("Failed to get default output config")?;
    let output_config = StreamConfig {
        channels: output_config.channels(),
        sample_rate: output_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(OUTPUT_CHUNK_SIZE as cpal::FrameCount),
    };
    let output_channel_count = output_config.channels as usize;
    let output_sample_rate = output_config.sample_rate.0;
    tracing::info!("Output stream config: {:?}", &output_config);

    let playback =
        rehearse_native_utils::audio::playback_buffer(output_sample_rate as usize * OUTPUT_LATENCY_MS / 1000);
    let (playback_tx, mut playback_rx) = playback.split();

    // The synthesizer raises this flag on cancel; the callback then drains
    // the buffer so a superseded utterance stops immediately.
    let flush_flag = Arc::new(AtomicBool::new(false));
    let flush = Arc::clone(&flush_flag);
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        if flush.swap(false, Ordering::Relaxed) {
            while playback_rx.try_pop().is_some() {}
        }
        for frame in data.chunks_mut(output_channel_count) {
            let sample = playback_rx.try_pop().unwrap_or(0.0);
            frame.fill(sample);
        }
    };
    let output_stream = output.build_output_stream(
        &output_config,
        output_data_fn,
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    output_stream.play()?;

    // --- 5. Voice Backends ---
    let synth = Arc::new(speech::HttpSpeechSynthesizer::new(
        &config,
        playback_tx,
        output_sample_rate,
        Arc::clone(&flush_flag),
    ));
    let transcriber = Arc::new(transcribe::HttpTranscriber::new(&config));
    let capture = Arc::new(CpalCapture::spawn(args.input_device.clone()));
    let camera = Arc::new(media::NoCamera);

    // --- 6. Channels ---
    // Commands flow core -> runtime; actions flow runtime -> core; voice
    // events flow coordinator -> runtime.
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(32);
    let (action_tx, mut action_rx) = mpsc::channel::<SessionAction>(32);
    let (voice_tx, mut voice_rx) = mpsc::channel::<VoiceEvent>(64);

    let coordinator = Arc::new(tokio::sync::Mutex::new(VoiceCoordinator::new(
        synth,
        transcriber,
        capture,
        camera,
        config.language.clone(),
        voice_tx,
    )));

    // The answer draft the UI would hold in its input widget. Transcripts
    // land here; `send` submits it.
    let draft = Arc::new(Mutex::new(String::new()));

    // --- 7. Session Setup ---
    let source = FileQuestionSource::new(&questions_file);
    let mut session = Session::from_source(&source, command_tx.clone()).await;

    // This task executes the side effects the core asks for.
    let coordinator_for_commands = Arc::clone(&coordinator);
    let action_tx_for_commands = action_tx.clone();
    let draft_for_commands = Arc::clone(&draft);
    let command_handler = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            match command {
                Command::Speak { text, rate } => {
                    coordinator_for_commands.lock().await.speak(text, rate);
                }
                Command::SpeakLater { text, rate, delay } => {
                    let coordinator = Arc::clone(&coordinator_for_commands);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        coordinator.lock().await.speak(text, rate);
                    });
                }
                Command::ScheduleAutoSubmit { seq, delay } => {
                    let action_tx = action_tx_for_commands.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Err(e) = action_tx.send(SessionAction::AutoSubmitDue(seq)).await {
                            tracing::warn!("Failed to deliver auto-submit timer: {e}");
                        }
                    });
                }
                Command::ShowQuestion {
                    number,
                    total,
                    text,
                } => {
                    println!("\n=== Question {number}/{total} ===");
                    println!("{text}\n");
                }
                Command::ShowFeedback(result) => {
                    println!("\nScore: {}/10", result.score);
                    println!("{}", result.feedback);
                    println!("Tips:");
                    for tip in &result.tips {
                        println!("  - {tip}");
                    }
                }
                Command::FillAnswerInput(text) => {
                    println!("[transcript] {text}");
                    *draft_for_commands.lock().unwrap() = text;
                }
                Command::ResetPrompt => {
                    draft_for_commands.lock().unwrap().clear();
                }
                Command::Status(message) => {
                    println!("[status] {message}");
                }
            }
        }
    });

    // This task turns coordinator events into session actions and user-facing
    // indicator lines.
    let action_tx_for_voice = action_tx.clone();
    let voice_pump = tokio::spawn(async move {
        while let Some(event) = voice_rx.recv().await {
            match event {
                VoiceEvent::Transcript(text) => {
                    if let Err(e) = action_tx_for_voice
                        .send(SessionAction::TranscriptReady(text))
                        .await
                    {
                        tracing::warn!("Failed to forward transcript: {e}");
                    }
                }
                VoiceEvent::TranscriptionFailed(e) => {
                    let _ = action_tx_for_voice
                        .send(SessionAction::TranscriptionFailed(e.to_string()))
                        .await;
                }
                VoiceEvent::CaptureFailed(e) => {
                    let _ = action_tx_for_voice
                        .send(SessionAction::CaptureFailed(e.to_string()))
                        .await;
                }
                VoiceEvent::CaptureStarted => println!("[recording] on"),
                VoiceEvent::CaptureStopped => println!("[recording] off"),
                VoiceEvent::CameraOn => println!("[camera] on"),
                VoiceEvent::CameraOff => println!("[camera] off"),
                VoiceEvent::CameraFailed(e) => println!("[camera] unavailable: {e}"),
                VoiceEvent::MonitorOn => println!("[microphone] on"),
                VoiceEvent::MonitorOff => println!("[microphone] off"),
                VoiceEvent::SpeakingStarted => tracing::debug!("Coach speaking..."),
                VoiceEvent::SpeakingFinished => tracing::debug!("Coach speaking done"),
            }
        }
    });

    // The single dispatch table: one tagged action per input line, mapped
    // onto session or coordinator methods.
    let coordinator_for_input = Arc::clone(&coordinator);
    let action_tx_for_input = action_tx.clone();
    let draft_for_input = Arc::clone(&draft);
    let input_loop = tokio::spawn(async move {
        print_help();
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            let (verb, rest) = match line.split_once(' ') {
                Some((verb, rest)) => (verb, rest.trim()),
                None => (line, ""),
            };
            match verb {
                "answer" | "a" => {
                    let _ = action_tx_for_input
                        .send(SessionAction::Submit(rest.to_string()))
                        .await;
                }
                "edit" | "e" => {
                    *draft_for_input.lock().unwrap() = rest.to_string();
                    let _ = action_tx_for_input.send(SessionAction::InputEdited).await;
                }
                "send" | "s" => {
                    let text = draft_for_input.lock().unwrap().clone();
                    let _ = action_tx_for_input.send(SessionAction::Submit(text)).await;
                }
                "hint" | "h" => {
                    let _ = action_tx_for_input.send(SessionAction::Hint).await;
                }
                "next" | "n" => {
                    let _ = action_tx_for_input.send(SessionAction::Advance).await;
                }
                "rec" | "r" => coordinator_for_input.lock().await.toggle_capture().await,
                "cam" => {
                    coordinator_for_input
                        .lock()
                        .await
                        .toggle_camera_preview()
                        .await
                }
                "mic" => {
                    coordinator_for_input
                        .lock()
                        .await
                        .toggle_microphone_monitor()
                        .await
                }
                "status" => {
                    {
                        let coordinator = coordinator_for_input.lock().await;
                        println!(
                            "[status] recording: {}, speaking: {}, camera: {}, mic monitor: {}",
                            coordinator.is_recording(),
                            coordinator.is_speaking(),
                            coordinator.camera_on(),
                            coordinator.monitor_on()
                        );
                    }
                    let _ = action_tx_for_input.send(SessionAction::QueryStatus).await;
                }
                "help" | "?" => print_help(),
                "quit" | "q" => break,
                "" => {}
                other => println!("Unknown action: {other} (try 'help')"),
            }
        }
    });

    // The session task owns the state machine; everything reaches it through
    // the action channel, so transitions are serialized.
    let session_task = tokio::spawn(async move {
        if let Err(e) = session.start().await {
            tracing::error!("Failed to start session: {e:?}");
            return;
        }
        while let Some(action) = action_rx.recv().await {
            if let Err(e) = session.dispatch(action).await {
                tracing::error!("Error in session handler: {e:?}");
            }
        }
    });

    tokio::select! {
        _ = command_handler => {},
        _ = voice_pump => {},
        _ = input_loop => {},
        _ = session_task => {},
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
        }
    }

    // Device tracks must be released on every exit path.
    coordinator.lock().await.release_all().await;
    tracing::info!("Shutting down...");
    Ok(())
}

fn print_help() {
    println!("Actions:");
    println!("  answer <text>  submit an answer (alias: a)");
    println!("  edit <text>    edit the answer draft (alias: e)");
    println!("  send           submit the current draft (alias: s)");
    println!("  hint           hear an example answer (alias: h)");
    println!("  next           go to the next question (alias: n)");
    println!("  rec            toggle voice recording (alias: r)");
    println!("  cam            toggle the camera preview");
    println!("  mic            toggle the microphone monitor");
    println!("  status         show session status");
    println!("  quit           exit (alias: q)");
}
