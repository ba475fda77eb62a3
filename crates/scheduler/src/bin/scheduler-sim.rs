//! scheduler-sim: replays a scripted renderer session on a simulated clock.
//!
//! The script drives a few main frames with work on every queue, a touch
//! scroll handled by the compositor, then a trip to the background and back.
//! At the end the policy snapshot and task metrics are printed as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use renderer_scheduler::{
    BeginFrameArgs, InputEvent, InputEventState, InputEventType, PolicySnapshot,
    RendererScheduler, SchedulerConfig, SchedulerMetrics, SimulatedClock, TimeTicks,
    WorkerScheduler,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Replay a scripted renderer session and print scheduler metrics.
#[derive(Parser, Debug)]
#[command(name = "scheduler-sim", version, about)]
struct Cli {
    /// Path to a scheduler TOML config. Defaults are used when omitted.
    #[arg(long, env = "SCHEDULER_CONFIG")]
    config: Option<PathBuf>,

    /// Main frames to produce before and after the gesture.
    #[arg(long, env = "SCHEDULER_SIM_FRAMES", default_value_t = 5)]
    frames: u32,

    /// Milliseconds spent in the background.
    #[arg(long, env = "SCHEDULER_SIM_BACKGROUND_MS", default_value_t = 2000)]
    background_ms: u64,
}

#[derive(Serialize)]
struct Report {
    elapsed_ms: u64,
    snapshot: PolicySnapshot,
    renderer: SchedulerMetrics,
    worker: SchedulerMetrics,
}

// ── Script ──────────────────────────────────────────────────────────

struct Session {
    clock: SimulatedClock,
    scheduler: Arc<RendererScheduler>,
    frame_interval: Duration,
}

impl Session {
    fn post_work(&self) {
        let clock = self.clock.clone();
        self.scheduler
            .default_task_queue()
            .post_task(move || clock.advance(Duration::from_millis(2)));
        let clock = self.clock.clone();
        self.scheduler
            .loading_task_queue()
            .post_task(move || clock.advance(Duration::from_millis(4)));
        let clock = self.clock.clone();
        self.scheduler
            .timer_task_queue()
            .post_delayed_task(move || clock.advance(Duration::from_millis(1)), Duration::from_millis(10));
        self.scheduler
            .idle_task_runner()
            .post_idle_task(|_deadline| {});
    }

    fn frame(&self) {
        let args = BeginFrameArgs::new(self.clock.now(), self.frame_interval).on_critical_path(true);
        self.scheduler.will_begin_frame(&args);
        let clock = self.clock.clone();
        self.scheduler
            .compositor_task_queue()
            .post_task(move || clock.advance(Duration::from_millis(3)));
        self.run_for(Duration::from_millis(4));
        self.scheduler.did_commit_frame_to_compositor();
        self.run_for(self.frame_interval.saturating_sub(Duration::from_millis(4)));
    }

    fn run_for(&self, period: Duration) {
        self.scheduler
            .helper()
            .manager()
            .run_for_period(&self.clock, period);
    }

    fn compositor_input(&self, event_type: InputEventType) {
        self.scheduler.did_handle_input_event_on_compositor_thread(
            &InputEvent::new(event_type),
            InputEventState::ConsumedByCompositor,
        );
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let config = SchedulerConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            info!(path = %path.display(), "loaded scheduler config");
            config
        }
        None => SchedulerConfig::default(),
    };

    let start = TimeTicks::from_millis(1000);
    let clock = SimulatedClock::new(start);
    let scheduler = RendererScheduler::new(Arc::new(clock.clone()), &config);
    let worker = WorkerScheduler::new(Arc::new(clock.clone()), &config);
    worker.init();

    let session = Session {
        clock: clock.clone(),
        scheduler: Arc::clone(&scheduler),
        frame_interval: config.renderer.default_frame_interval(),
    };
    scheduler.set_has_visible_render_widget_with_touch_handler(true);

    info!(frames = cli.frames, "replaying page load");
    for _ in 0..cli.frames {
        session.post_work();
        session.frame();
    }

    info!("replaying touch scroll");
    session.compositor_input(InputEventType::TouchStart);
    session.compositor_input(InputEventType::GestureScrollBegin);
    for _ in 0..cli.frames {
        session.compositor_input(InputEventType::GestureScrollUpdate);
        scheduler.did_animate_for_input_on_compositor_thread();
        session.post_work();
        session.frame();
    }
    session.compositor_input(InputEventType::GestureScrollEnd);

    scheduler.begin_frame_not_expected_soon();
    session.run_for(Duration::from_millis(500));

    info!(background_ms = cli.background_ms, "replaying background trip");
    scheduler.set_all_render_widgets_hidden(true);
    scheduler.on_renderer_backgrounded();
    session.post_work();
    session.run_for(Duration::from_millis(cli.background_ms));
    scheduler.on_renderer_foregrounded();
    scheduler.set_all_render_widgets_hidden(false);
    session.frame();

    worker
        .default_task_queue()
        .post_task(|| info!("worker task ran"));
    worker.helper().manager().run_until_idle();

    let report = Report {
        elapsed_ms: u64::try_from(clock.now().saturating_duration_since(start).as_millis())
            .unwrap_or(u64::MAX),
        snapshot: scheduler.snapshot(),
        renderer: scheduler.metrics(),
        worker: worker.metrics(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    worker.shutdown();
    scheduler.shutdown();
    Ok(())
}
