//! Loop de ingestão: espera prontidão, lê um registro por vez, imprime e
//! decide quando terminar.
//!
//! ```text
//! RUNNING ──timeout──────────────▶ RUNNING   ("[timeout] no data")
//!    │ ──short read──────────────▶ RUNNING   ("[short read]")
//!    │ ──registro────────────────▶ RUNNING   ("<ts> temp=..C alert=..")
//!    │ ──alerta + self-test──────▶ TERMINATED(TestPassed)
//!    │ ──HUP/ERR─────────────────▶ TERMINATED(DeviceError)
//!    │ ──Ctrl+C──────────────────▶ TERMINATED(Interrupted)
//!    └ ──prazo do self-test──────▶ TERMINATED(TestTimedOut)
//! ```

use crate::device::{DeviceError, EventSource, WaitOutcome};
use crate::record::{RECORD_SIZE, TelemetryRecord, decode_record};
use crate::self_test::{SelfTest, Verdict};
use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Códigos de saída do processo.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const STARTUP: i32 = 1;
    pub const DEVICE_ERROR: i32 = 2;
    pub const TEST_TIMED_OUT: i32 = 3;
    pub const INTERRUPTED: i32 = 130;
}

/// Motivo do fim do loop.
#[derive(Debug)]
pub enum Termination {
    TestPassed,
    TestTimedOut,
    DeviceError(DeviceError),
    /// `test_armed`: o Ctrl+C chegou antes do self-test passar.
    Interrupted { test_armed: bool },
}

impl Termination {
    pub fn exit_code(&self) -> i32 {
        match self {
            Termination::TestPassed => exit_code::SUCCESS,
            Termination::Interrupted { test_armed: false } => exit_code::SUCCESS,
            Termination::Interrupted { test_armed: true } => exit_code::INTERRUPTED,
            Termination::DeviceError(_) => exit_code::DEVICE_ERROR,
            Termination::TestTimedOut => exit_code::TEST_TIMED_OUT,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::TestPassed => f.write_str("self-test aprovado"),
            Termination::TestTimedOut => f.write_str("self-test sem alerta dentro do prazo"),
            Termination::DeviceError(e) => write!(f, "erro de dispositivo: {e}"),
            Termination::Interrupted { .. } => f.write_str("interrompido pelo usuário"),
        }
    }
}

/// Contadores da sessão.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub records: u64,
    pub alerts: u64,
    pub short_reads: u64,
    pub timeouts: u64,
}

pub struct TelemetryLoop<S, W> {
    source: S,
    out: W,
    poll_timeout: Duration,
    self_test: SelfTest,
    stats: LoopStats,
}

impl<S: EventSource, W: Write> TelemetryLoop<S, W> {
    pub fn new(source: S, out: W, poll_timeout: Duration) -> Self {
        Self {
            source,
            out,
            poll_timeout,
            self_test: SelfTest::disabled(),
            stats: LoopStats::default(),
        }
    }

    pub fn with_self_test(mut self, gate: SelfTest) -> Self {
        self.self_test = gate;
        self
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_parts(self) -> (S, W) {
        (self.source, self.out)
    }

    /// Roda até um estado terminal.
    pub fn run(&mut self) -> Termination {
        if let Err(e) = self.source.register_interest() {
            error!("Falha ao registrar interesse: {e}");
            return Termination::DeviceError(e);
        }

        let end = loop {
            if let Some(end) = self.step() {
                break end;
            }
        };

        info!(
            "Loop encerrado ({end}) | self-test={:?} registros={} alertas={} leituras curtas={} timeouts={}",
            self.self_test.state(),
            self.stats.records,
            self.stats.alerts,
            self.stats.short_reads,
            self.stats.timeouts
        );
        end
    }

    /// Uma iteração: espera, trata as condições, checa o prazo do self-test.
    ///
    /// A janela do poll nunca passa do tempo restante do self-test, então o
    /// prazo é honrado mesmo com `poll_timeout` maior que ele.
    fn step(&mut self) -> Option<Termination> {
        let (window, cut_by_deadline) = match self.self_test.remaining(Instant::now()) {
            Some(left) if left < self.poll_timeout => (left, true),
            _ => (self.poll_timeout, false),
        };

        let outcome = match self.source.wait(window) {
            Ok(outcome) => outcome,
            Err(e) => return Some(self.device_failure(e)),
        };

        match outcome {
            // Janela encurtada pelo prazo não é um heartbeat
            WaitOutcome::TimedOut if cut_by_deadline => {}
            WaitOutcome::TimedOut => {
                self.stats.timeouts += 1;
                self.emit("[timeout] no data");
            }
            WaitOutcome::Interrupted => {
                info!("Interrupção recebida");
                return Some(Termination::Interrupted {
                    test_armed: self.self_test.is_armed(),
                });
            }
            WaitOutcome::Ready(conditions) => {
                if conditions.is_fault() {
                    return Some(self.device_failure(DeviceError::Fault(conditions)));
                }
                if conditions.has_data() {
                    if let Some(end) = self.read_one() {
                        return Some(end);
                    }
                }
            }
        }

        if self.self_test.check_deadline(Instant::now()) == Verdict::TimedOut {
            self.emit("TEST: FAIL (no threshold event)");
            return Some(Termination::TestTimedOut);
        }
        None
    }

    fn read_one(&mut self) -> Option<Termination> {
        let mut buf = [0u8; RECORD_SIZE];
        let n = match self.source.read_record(&mut buf) {
            Ok(n) => n,
            Err(e) => return Some(self.device_failure(e)),
        };

        let record = match decode_record(&buf[..n]) {
            Ok(record) => record,
            Err(e) => {
                self.stats.short_reads += 1;
                debug!("{e}");
                self.emit("[short read]");
                return None;
            }
        };

        self.on_record(&record)
    }

    fn on_record(&mut self, record: &TelemetryRecord) -> Option<Termination> {
        self.stats.records += 1;
        if !record.new_sample() {
            debug!("Registro sem NEW_SAMPLE (flags={:#x})", record.flags);
        }
        if record.alert() {
            self.stats.alerts += 1;
        }
        self.emit(record);

        if self.self_test.observe(record) == Verdict::Passed {
            self.emit("TEST: PASS (threshold event)");
            return Some(Termination::TestPassed);
        }
        None
    }

    fn device_failure(&mut self, e: DeviceError) -> Termination {
        error!("{e}");
        self.emit("[error] device");
        Termination::DeviceError(e)
    }

    fn emit(&mut self, line: impl fmt::Display) {
        if let Err(e) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            warn!("Falha ao escrever saída: {e}");
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
