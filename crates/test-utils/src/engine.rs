//! Instrumented engine double.
//!
//! [`CountingEngineFactory`] produces engines that fill tiles with a solid
//! colour and record everything the pool and assembler do with them:
//! creations, destructions, render calls, and how many renders overlap.
//! Failures can be injected at construction or after a number of renders.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mapgen_common::StyleDocument;
use renderer::{EngineError, EngineFactory, MapEngine, RasterTile, TileRenderParams};

/// Shared counters, readable while engines are in use.
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub create_attempts: AtomicUsize,
    pub creates: AtomicUsize,
    pub destroys: AtomicUsize,
    pub renders: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Renders that started on an engine already rendering.
    pub exclusivity_violations: AtomicUsize,
    rendering: Mutex<HashSet<usize>>,
}

impl EngineCounters {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn exclusivity_violations(&self) -> usize {
        self.exclusivity_violations.load(Ordering::SeqCst)
    }

    /// Engines created and not yet destroyed.
    pub fn live(&self) -> usize {
        self.creates().saturating_sub(self.destroys())
    }

    fn begin_render(&self, engine_id: usize) {
        let newly_rendering = self
            .rendering
            .lock()
            .map(|mut set| set.insert(engine_id))
            .unwrap_or(false);
        if !newly_rendering {
            self.exclusivity_violations.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn end_render(&self, engine_id: usize) {
        if let Ok(mut set) = self.rendering.lock() {
            set.remove(&engine_id);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Render,
    Fatal,
}

/// Engine factory double with injectable behaviour.
pub struct CountingEngineFactory {
    counters: Arc<EngineCounters>,
    render_delay: Duration,
    destroy_delay: Duration,
    init_failures_left: AtomicUsize,
    fail_after: Option<(usize, FailureKind)>,
    color: [u8; 4],
    next_id: AtomicUsize,
}

impl Default for CountingEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingEngineFactory {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(EngineCounters::default()),
            render_delay: Duration::ZERO,
            destroy_delay: Duration::ZERO,
            init_failures_left: AtomicUsize::new(0),
            fail_after: None,
            color: [10, 20, 30, 255],
            next_id: AtomicUsize::new(0),
        }
    }

    /// Every render call sleeps this long before returning.
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    /// Every destroy call blocks this long; the destroy is counted after.
    pub fn with_destroy_delay(mut self, delay: Duration) -> Self {
        self.destroy_delay = delay;
        self
    }

    /// The first `times` creation attempts fail with [`EngineError::Init`].
    pub fn failing_init(self, times: usize) -> Self {
        self.init_failures_left.store(times, Ordering::SeqCst);
        self
    }

    /// Renders after the first `renders` (counted across all engines) fail
    /// with [`EngineError::Render`].
    pub fn failing_after(mut self, renders: usize) -> Self {
        self.fail_after = Some((renders, FailureKind::Render));
        self
    }

    /// Like [`failing_after`](Self::failing_after) but with [`EngineError::Fatal`].
    pub fn fatal_after(mut self, renders: usize) -> Self {
        self.fail_after = Some((renders, FailureKind::Fatal));
        self
    }

    pub fn with_color(mut self, rgba: [u8; 4]) -> Self {
        self.color = rgba;
        self
    }

    pub fn counters(&self) -> Arc<EngineCounters> {
        self.counters.clone()
    }

    pub fn color(&self) -> [u8; 4] {
        self.color
    }
}

impl EngineFactory for CountingEngineFactory {
    fn create(&self, _style: &StyleDocument, _scale: f64) -> Result<Box<dyn MapEngine>, EngineError> {
        self.counters.create_attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .init_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(EngineError::Init("injected init failure".to_string()));
        }

        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingEngine {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            counters: self.counters.clone(),
            render_delay: self.render_delay,
            fail_after: self.fail_after,
            color: self.color,
        }))
    }

    fn destroy(&self, engine: Box<dyn MapEngine>) {
        if !self.destroy_delay.is_zero() {
            thread::sleep(self.destroy_delay);
        }
        drop(engine);
        self.counters.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingEngine {
    id: usize,
    counters: Arc<EngineCounters>,
    render_delay: Duration,
    fail_after: Option<(usize, FailureKind)>,
    color: [u8; 4],
}

impl MapEngine for CountingEngine {
    fn render(&mut self, params: &TileRenderParams) -> Result<RasterTile, EngineError> {
        let n = self.counters.renders.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.begin_render(self.id);

        if !self.render_delay.is_zero() {
            thread::sleep(self.render_delay);
        }

        let result = match self.fail_after {
            Some((limit, FailureKind::Render)) if n > limit => {
                Err(EngineError::Render(format!("injected failure on render {}", n)))
            }
            Some((limit, FailureKind::Fatal)) if n > limit => {
                Err(EngineError::Fatal(format!("injected fault on render {}", n)))
            }
            _ => {
                let (width, height) = params.physical_size();
                Ok(RasterTile::filled(width, height, self.color))
            }
        };

        self.counters.end_render(self.id);
        result
    }
}
