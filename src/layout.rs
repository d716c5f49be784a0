//! Force-directed 3-D layout of the class graph.
//!
//! Every tick runs an all-pairs repulsion pass and an attraction pass over
//! a snapshot of node positions. Both passes accumulate per-node deltas,
//! which are applied once at the end of the tick. The constants are visual
//! tuning values, not physical units.

use rand::Rng;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::graph::DependencyGraph;

pub const NODE_RADIUS: f32 = 6.378;
const SHORT_THRESHOLD: f32 = 3.0 * NODE_RADIUS;
const LONG_THRESHOLD: f32 = 8.0 * NODE_RADIUS;
const ATTRACTION_THRESHOLD: f32 = 4.0 * NODE_RADIUS;
const REPULSION_FRACTION: f32 = 1.0 / 3.0;
/// Pull per unit of relationship weight, per tick.
const ATTRACTION_RATE: f32 = NODE_RADIUS / 8.0;

type Vec3 = [f32; 3];

#[derive(Debug, Clone, Copy)]
pub struct LayoutConfig {
    pub interval: Duration,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
        }
    }
}

pub struct LayoutEngine {
    graph: Arc<DependencyGraph>,
    config: LayoutConfig,
    stopped: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
}

impl LayoutEngine {
    pub fn new(graph: Arc<DependencyGraph>, config: LayoutConfig) -> Self {
        Self {
            graph,
            config,
            stopped: Arc::new(AtomicBool::new(false)),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Runs one relaxation step. Returns without applying anything if the
    /// engine is stopped between passes.
    pub fn tick(&self) {
        let started = Instant::now();
        let nodes = self.graph.nodes();
        let n = nodes.len();
        if n < 2 {
            return;
        }

        let positions: Vec<Vec3> = nodes.iter().map(|node| node.position()).collect();

        let mut deltas = (0..n)
            .into_par_iter()
            .fold(
                || vec![[0.0f32; 3]; n],
                |mut acc, i| {
                    for j in (i + 1)..n {
                        let (dir, dist) = separation(positions[i], positions[j]);
                        let related = self
                            .graph
                            .attraction_between(nodes[i].identity(), nodes[j].identity())
                            > 0.0;
                        let step = repulsion_step(related, dist);
                        if step > 0.0 {
                            push(&mut acc, i, j, dir, step);
                        }
                    }
                    acc
                },
            )
            .reduce(|| vec![[0.0f32; 3]; n], merge);

        if self.is_stopped() {
            return;
        }

        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.identity(), i))
            .collect();
        for (i, node) in nodes.iter().enumerate() {
            for (partner, weight) in node.relationships() {
                // Partners created after the snapshot wait for the next tick.
                let Some(&j) = index.get(partner.as_str()) else {
                    continue;
                };
                let (dir, dist) = separation(positions[i], positions[j]);
                if dist <= ATTRACTION_THRESHOLD {
                    continue;
                }
                let step = (weight * ATTRACTION_RATE).min(dist - ATTRACTION_THRESHOLD);
                push(&mut deltas, i, j, dir, -step);
            }
        }

        if self.is_stopped() {
            return;
        }

        for (node, delta) in nodes.iter().zip(&deltas) {
            if *delta != [0.0; 3] {
                node.translate(*delta);
            }
        }

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(tick, nodes = n, elapsed_us = started.elapsed().as_micros() as u64, "layout tick");
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Moves the engine onto its own thread, ticking every
    /// `config.interval` until the returned handle is stopped.
    pub fn spawn(self) -> std::io::Result<LayoutHandle> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let stopped = Arc::clone(&self.stopped);
        let ticks = Arc::clone(&self.ticks);
        let handle = std::thread::Builder::new()
            .name("class-graph-layout".to_string())
            .spawn(move || run(self, rx))?;

        Ok(LayoutHandle {
            tx: Some(tx),
            stopped,
            ticks,
            handle: Some(handle),
        })
    }
}

fn run(engine: LayoutEngine, rx: Receiver<()>) {
    loop {
        match rx.recv_timeout(engine.config.interval) {
            Err(RecvTimeoutError::Timeout) => engine.tick(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(ticks = engine.ticks(), "layout stopped");
}

pub struct LayoutHandle {
    tx: Option<Sender<()>>,
    stopped: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl LayoutHandle {
    /// Interrupts the pending wait (or the running tick) and joins the
    /// layout thread. Further calls are no-ops.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for LayoutHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn repulsion_step(related: bool, dist: f32) -> f32 {
    if related && dist < SHORT_THRESHOLD {
        SHORT_THRESHOLD * REPULSION_FRACTION
    } else if dist < LONG_THRESHOLD {
        (LONG_THRESHOLD * LONG_THRESHOLD - dist * dist).sqrt() * REPULSION_FRACTION
    } else {
        0.0
    }
}

/// Unit vector pointing from `b` to `a`, and the distance between them.
/// Coincident points get a random direction.
fn separation(a: Vec3, b: Vec3) -> (Vec3, f32) {
    let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    let dist = length(d);
    if dist > 0.0 {
        return ([d[0] / dist, d[1] / dist, d[2] / dist], dist);
    }
    (random_unit(), 0.0)
}

fn random_unit() -> Vec3 {
    let mut rng = rand::thread_rng();
    loop {
        let v = [
            rng.gen_range(-1.0f32..=1.0),
            rng.gen_range(-1.0f32..=1.0),
            rng.gen_range(-1.0f32..=1.0),
        ];
        let len = length(v);
        if len > 1e-3 && len <= 1.0 {
            return [v[0] / len, v[1] / len, v[2] / len];
        }
    }
}

fn length(v: Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Moves `i` along `dir` and `j` against it, half of `step` each.
/// A negative step pulls the pair together.
fn push(deltas: &mut [Vec3], i: usize, j: usize, dir: Vec3, step: f32) {
    let half = step * 0.5;
    for k in 0..3 {
        deltas[i][k] += dir[k] * half;
        deltas[j][k] -= dir[k] * half;
    }
}

fn merge(mut a: Vec<Vec3>, b: Vec<Vec3>) -> Vec<Vec3> {
    for (x, y) in a.iter_mut().zip(b) {
        x[0] += y[0];
        x[1] += y[1];
        x[2] += y[2];
    }
    a
}
