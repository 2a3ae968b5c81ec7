//! Pixel models: the atomic models of the benchmark topologies.
//!
//! A [`TopPixel`] fires every time unit. A [`NormalPixel`] waits for one
//! message from each of its neighbours, then burns its workload and emits.

use crate::config::{self, CommonConfig};
use crate::graph::PortId;
use crate::invariant_ppt::{assert_invariant, RENDEZVOUS_REACHED, RENDEZVOUS_RESET};
use crate::model::{AtomicModel, Bag, ModelError, Time, INFINITY};
use crate::workload;
use std::time::Duration;

/// Time-driven source pixel.
#[derive(Debug, Default)]
pub struct TopPixel {
    name: String,
    duration: Duration,
    value: f64,
}

impl TopPixel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AtomicModel for TopPixel {
    fn init(&mut self, common: &CommonConfig, _time: Time) -> Result<Time, ModelError> {
        self.name = common.get(config::NAME)?;
        self.duration = workload::millis(common.get(config::DURATION)?);
        Ok(0.0)
    }

    fn internal_transition(&mut self, _elapsed: Time) -> Result<Time, ModelError> {
        workload::run_for(self.duration)?;
        Ok(1.0)
    }

    fn output(&self) -> Bag {
        Bag::on(PortId(0), &[self.value])
    }
}

/// Rendezvous phase of a [`NormalPixel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// Collecting one message per neighbour.
    #[default]
    Wait,
    /// Every neighbour was heard; emit and transition next.
    Send,
}

/// Received message count against what the simulated window implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consistency {
    pub expected: u64,
    pub received: u64,
}

impl Consistency {
    pub fn holds(&self) -> bool {
        self.expected == self.received
    }
}

/// Rendezvous relay pixel.
#[derive(Debug)]
pub struct NormalPixel {
    name: String,
    value: f64,
    current_time: Time,
    last_time: Time,
    duration: Duration,
    neighbour_number: u64,
    received: u64,
    total_received: u64,
    phase: Phase,
    expected_cycles: Option<u64>,
    initialized: bool,
}

impl Default for NormalPixel {
    fn default() -> Self {
        Self {
            name: String::new(),
            value: 0.0,
            current_time: f64::NEG_INFINITY,
            last_time: f64::NEG_INFINITY,
            duration: Duration::ZERO,
            neighbour_number: 0,
            received: 0,
            total_received: 0,
            phase: Phase::Wait,
            expected_cycles: None,
            initialized: false,
        }
    }
}

impl NormalPixel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    pub fn neighbour_number(&self) -> u64 {
        self.neighbour_number
    }

    /// Time of the last completed rendezvous cycle.
    pub fn last_time(&self) -> Time {
        self.last_time
    }

    /// Compare `total_received` against `neighbour_number` times the number
    /// of cycles the simulated window holds. `None` when the window length
    /// was not configured.
    pub fn consistency(&self) -> Option<Consistency> {
        self.expected_cycles.map(|cycles| Consistency {
            expected: self.neighbour_number * cycles,
            received: self.total_received,
        })
    }

    fn time_advance(&self) -> Time {
        match self.phase {
            Phase::Wait => INFINITY,
            Phase::Send => 0.0,
        }
    }
}

impl AtomicModel for NormalPixel {
    fn init(&mut self, common: &CommonConfig, time: Time) -> Result<Time, ModelError> {
        self.value = 0.0;
        self.current_time = time;
        self.last_time = f64::NEG_INFINITY;
        self.duration = workload::millis(common.get(config::DURATION)?);
        self.name = common.get(config::NAME)?;
        self.neighbour_number = common.get(config::NEIGHBOUR_NUMBER)?;
        self.expected_cycles = common
            .get_opt::<f64>(config::SIMULATION_DURATION)?
            .map(|window| window.max(0.0).ceil() as u64);
        self.received = 0;
        self.total_received = 0;
        self.phase = Phase::Wait;
        self.initialized = true;
        Ok(INFINITY)
    }

    fn internal_transition(&mut self, elapsed: Time) -> Result<Time, ModelError> {
        self.current_time += elapsed;
        workload::run_for(self.duration)?;

        if self.phase == Phase::Send {
            self.phase = Phase::Wait;
            self.total_received += self.received;
            self.received = 0;
            self.last_time = self.current_time;
            assert_invariant(
                RENDEZVOUS_RESET,
                self.received == 0 && self.phase == Phase::Wait,
                "cycle folded and counter reset",
                Some(self.name.as_str()),
            );
        }
        Ok(self.time_advance())
    }

    fn external_transition(&mut self, elapsed: Time, inputs: &Bag) -> Result<Time, ModelError> {
        self.current_time += elapsed;
        self.received += inputs.port(PortId(0)).len() as u64;

        if self.received == self.neighbour_number {
            self.phase = Phase::Send;
            assert_invariant(
                RENDEZVOUS_REACHED,
                self.received == self.neighbour_number,
                "all neighbours heard",
                Some(self.name.as_str()),
            );
        }
        Ok(self.time_advance())
    }

    fn output(&self) -> Bag {
        match self.phase {
            Phase::Send => Bag::on(PortId(0), &[self.value]),
            Phase::Wait => Bag::new(),
        }
    }

    fn input_ports(&self) -> usize {
        1
    }
}

impl Drop for NormalPixel {
    fn drop(&mut self) {
        if !self.initialized {
            return;
        }
        log::debug!(
            "NormalPixel {} have received {} messages",
            self.name,
            self.total_received
        );
        if let Some(check) = self.consistency().filter(|c| !c.holds()) {
            log::warn!(
                "NormalPixel {} received {} messages, expected {}: lost or duplicated message",
                self.name,
                check.received,
                check.expected
            );
        }
    }
}
