//! # simtemp Core
//!
//! Cliente userspace do sensor de temperatura simulado (`nxp_simtemp`):
//! configura o driver via sysfs e consome os registros binários de
//! `/dev/simtemp` com `poll(2)` + `read(2)`.
//!
//! ## Módulos
//! - [`record`] – Registro de 16 bytes (decode/encode)
//! - [`device`] – Sessão com o device, espera por prontidão, interrupção
//! - [`sysfs`] – Escrita best-effort de `sampling_ms`, `threshold_mC`, `mode`
//! - [`self_test`] – Estado do self-test e prazo máximo
//! - [`telemetry_loop`] – Máquina de estados do loop de ingestão
//! - [`config`] – Configuração unificada via TOML

pub mod record;
pub mod device;
pub mod sysfs;
pub mod telemetry_loop;
pub mod config;

// Re-exports convenientes
pub use config::AppConfig;
pub use device::{EventSource, InterruptHandle, SimtempDevice};
pub use record::{RECORD_SIZE, TelemetryRecord, decode_record};
pub use sysfs::{ConfigPort, ConfigSnapshot, Mode, SysfsPort};
pub use telemetry_loop::{TelemetryLoop, Termination};
