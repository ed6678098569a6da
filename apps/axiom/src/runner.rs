//! # Tick Scheduler
//!
//! Drives an engine through a script. Items scheduled at tick `t` are
//! submitted once the engine has completed `t` ticks, before tick `t + 1`
//! runs. In real-time mode ticks are paced by a `tokio` interval and Ctrl-C
//! stops the run; either way in-flight signals are drained before returning.

use crate::script::{Scheduled, Script};
use axiom_core::gateway::Command;
use axiom_core::{
    AxiomError, CuriosityBuffer, DecisionSource, Engine, ProcessedSignal, SystemMetrics,
    TickReport,
};
use serde::Serialize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// How a run is paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub ticks: u64,
    /// Pace ticks by `interval` instead of running back to back.
    pub realtime: bool,
    pub interval: Duration,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    /// A scripted `shutdown` command.
    Command,
    Interrupted,
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub stop: StopReason,
    pub ticks_run: u64,
    pub final_tick: u64,
    pub decisions: u64,
    pub reflex_decisions: u64,
    pub links_created: u64,
    pub state_updates: u64,
    pub inputs_applied: u64,
    pub inputs_deferred: u64,
    pub inputs_failed: u64,
    pub proposals_applied: u64,
    pub proposals_failed: u64,
    /// Inputs parked in the curiosity queue, as submitted.
    pub unresolved: Vec<String>,
    pub metrics: SystemMetrics,
    pub state_hash: String,
}

impl RunSummary {
    fn new(engine: &Engine) -> Self {
        Self {
            stop: StopReason::Completed,
            ticks_run: 0,
            final_tick: engine.current_tick().value(),
            decisions: 0,
            reflex_decisions: 0,
            links_created: 0,
            state_updates: 0,
            inputs_applied: 0,
            inputs_deferred: 0,
            inputs_failed: 0,
            proposals_applied: 0,
            proposals_failed: 0,
            unresolved: Vec::new(),
            metrics: SystemMetrics::empty(engine.current_tick()),
            state_hash: String::new(),
        }
    }

    fn record(&mut self, report: &TickReport) {
        self.ticks_run += 1;
        self.final_tick = report.tick.value();
        self.decisions += report.decisions.len() as u64;
        self.reflex_decisions += report
            .decisions
            .iter()
            .filter(|d| d.winner.source == DecisionSource::Reflex)
            .count() as u64;
        self.links_created += report.links_created.len() as u64;
        self.state_updates += report.state_updates as u64;
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Submit everything due at `tick`.
fn apply_due(
    engine: &mut Engine,
    script: &Script,
    tick: u64,
    summary: &mut RunSummary,
) -> Result<Flow, AxiomError> {
    for item in script.due(tick) {
        match item {
            Scheduled::Proposal(proposal) => match engine.apply_proposal(proposal) {
                Ok(_) => summary.proposals_applied += 1,
                Err(err) => {
                    summary.proposals_failed += 1;
                    tracing::warn!(tick, proposal = proposal.label(), error = %err, "proposal rejected");
                }
            },
            Scheduled::Input(input) => match engine.submit(input.clone()) {
                Ok(ProcessedSignal::Command(Command::Shutdown)) => {
                    tracing::info!(tick, "shutdown requested by script");
                    return Ok(Flow::Stop);
                }
                Ok(ProcessedSignal::Command(Command::Tick { count })) => {
                    for report in engine.run(count)? {
                        summary.record(&report);
                    }
                }
                Ok(_) => summary.inputs_applied += 1,
                Err(err) if err.is_deferred() => {
                    summary.inputs_deferred += 1;
                    tracing::warn!(tick, input = %input, error = %err, "input deferred");
                }
                Err(err) => {
                    summary.inputs_failed += 1;
                    tracing::warn!(tick, input = %input, error = %err, "input rejected");
                }
            },
        }
    }
    Ok(Flow::Continue)
}

/// Run `options.ticks` ticks of `script` on `engine`.
///
/// Scheduled items skipped over by a scripted tick command are submitted
/// late, at the next scheduler step.
pub async fn run(
    engine: &mut Engine,
    script: &Script,
    curiosity: &CuriosityBuffer,
    options: RunOptions,
) -> Result<RunSummary, AxiomError> {
    let mut summary = RunSummary::new(engine);
    let target = engine.current_tick().value().saturating_add(options.ticks);
    let mut next_due = engine.current_tick().value();

    let mut interval = options.realtime.then(|| {
        let mut interval = tokio::time::interval(options.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tracing::info!(
        from = next_due,
        to = target,
        realtime = options.realtime,
        interval_ms = options.interval.as_millis() as u64,
        "run started"
    );

    'run: while engine.current_tick().value() < target {
        let now = engine.current_tick().value();
        while next_due <= now {
            if let Flow::Stop = apply_due(engine, script, next_due, &mut summary)? {
                summary.stop = StopReason::Command;
                break 'run;
            }
            next_due += 1;
        }
        if engine.current_tick().value() >= target {
            break;
        }

        if let Some(interval) = interval.as_mut() {
            tokio::select! {
                _ = interval.tick() => {}
                _ = &mut ctrl_c => {
                    tracing::info!(tick = now, "interrupted");
                    summary.stop = StopReason::Interrupted;
                    break 'run;
                }
            }
        }

        let report = engine.tick()?;
        summary.record(&report);
    }

    let drained = engine.shutdown();
    tracing::info!(
        tick = engine.current_tick().value(),
        drained = drained.signals,
        stop = ?summary.stop,
        "run finished"
    );

    summary.final_tick = engine.current_tick().value();
    summary.unresolved = curiosity.drain().iter().map(|u| u.input.to_string()).collect();
    summary.metrics = engine.metrics();
    summary.state_hash = engine.state_hash()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axiom_core::{EngineConfig, UnknownInputStrategy};
    use std::sync::Arc;

    fn engine(curiosity: &Arc<CuriosityBuffer>) -> Engine {
        let mut config = EngineConfig::default();
        config.gateway.unknown_input = UnknownInputStrategy::Defer;
        Engine::builder(config)
            .curiosity(curiosity.clone())
            .build()
            .expect("engine")
    }

    fn options(ticks: u64) -> RunOptions {
        RunOptions {
            ticks,
            realtime: false,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn scripted_words_fire_and_unknown_vectors_park() {
        let curiosity = Arc::new(CuriosityBuffer::new(8));
        let mut engine = engine(&curiosity);
        let script = Script::from_json(
            r#"{
                "seeds": [{ "label": "cat", "embedding": [1,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0] }],
                "inputs": [
                    { "at": 0, "input": { "type": "word", "text": "cat" } },
                    { "at": 1, "input": { "type": "vector", "values": [0,1,0,0,0,0,0,0,0,0,0,0,0,0,0,0] } }
                ]
            }"#,
        )
        .expect("script");
        script.seed(&mut engine).expect("seed");

        let summary = run(&mut engine, &script, &curiosity, options(3)).await.expect("run");
        assert_eq!(summary.stop, StopReason::Completed);
        assert_eq!(summary.ticks_run, 3);
        assert_eq!(summary.final_tick, 3);
        assert_eq!(summary.inputs_applied, 1);
        assert_eq!(summary.decisions, 1);
        assert_eq!(summary.inputs_deferred, 1);
        assert_eq!(summary.unresolved.len(), 1);
        assert_eq!(summary.state_hash.len(), 64);
    }

    #[tokio::test]
    async fn shutdown_command_stops_early() {
        let curiosity = Arc::new(CuriosityBuffer::new(8));
        let mut engine = engine(&curiosity);
        let script = Script::from_json(
            r#"{ "inputs": [{ "at": 2, "input": { "type": "command", "command": "shutdown" } }] }"#,
        )
        .expect("script");

        let summary = run(&mut engine, &script, &curiosity, options(10)).await.expect("run");
        assert_eq!(summary.stop, StopReason::Command);
        assert_eq!(summary.final_tick, 2);
        assert!(engine.is_shut_down());
    }

    #[tokio::test]
    async fn tick_command_advances_immediately() {
        let curiosity = Arc::new(CuriosityBuffer::new(8));
        let mut engine = engine(&curiosity);
        let script = Script::from_json(
            r#"{ "inputs": [{ "at": 0, "input": { "type": "command", "command": { "tick": { "count": 4 } } } }] }"#,
        )
        .expect("script");

        let summary = run(&mut engine, &script, &curiosity, options(2)).await.expect("run");
        assert_eq!(summary.ticks_run, 4);
        assert_eq!(summary.final_tick, 4);
    }
}
