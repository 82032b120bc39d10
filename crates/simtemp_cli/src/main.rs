//! # simtemp CLI
//!
//! Configura o `nxp_simtemp` via sysfs e acompanha a telemetria com
//! poll + read. Escritas no sysfs normalmente exigem root.
//!
//! ## Uso
//! ```bash
//! simtemp_cli                                   # Só leitura, até Ctrl+C
//! simtemp_cli --sampling-ms 100 --mode ramp     # Configura e lê
//! simtemp_cli --test                            # Self-test: sai 0 no primeiro alerta
//! simtemp_cli --status                          # Mostra atributos e stats
//! ```

use clap::{Parser, ValueEnum};
use simtemp_core::config::AppConfig;
use simtemp_core::device::SimtempDevice;
use simtemp_core::self_test::SelfTest;
use simtemp_core::sysfs::{self, Attribute, ConfigSnapshot, Mode, SysfsPort};
use simtemp_core::telemetry_loop::{TelemetryLoop, exit_code};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Normal,
    Noisy,
    Ramp,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Normal => Mode::Normal,
            ModeArg::Noisy => Mode::Noisy,
            ModeArg::Ramp => Mode::Ramp,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "simtemp_cli", version, about = "simtemp CLI (poll + read)")]
struct Cli {
    /// Período de amostragem (ms)
    #[arg(long)]
    sampling_ms: Option<u32>,

    /// Threshold de alerta (m°C)
    #[arg(long = "threshold-mc", visible_alias = "threshold-mC", allow_negative_numbers = true)]
    threshold_mc: Option<i32>,

    /// Modo de geração
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Dispara o threshold em ~2 períodos e sai 0 no primeiro alerta
    #[arg(long)]
    test: bool,

    /// Prazo do self-test em segundos (0 = sem limite)
    #[arg(long, value_name = "SECS")]
    self_test_timeout: Option<f64>,

    /// Arquivo de configuração TOML
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Character device (padrão: /dev/simtemp)
    #[arg(long, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Diretório sysfs (vazio desabilita as escritas)
    #[arg(long, value_name = "PATH")]
    sysfs: Option<String>,

    /// Mostra atributos e stats atuais e sai
    #[arg(long)]
    status: bool,
}

impl Cli {
    fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            sampling_ms: self.sampling_ms,
            threshold_mc: self.threshold_mc,
            mode: self.mode.map(Mode::from),
        }
    }
}

fn main() {
    // ── Logging (stderr: stdout é dos registros) ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    // ── Carregar config ──
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    apply_overrides(&mut config, cli);
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Configuração inválida: {e}");
        }
        return exit_code::STARTUP;
    }

    let mut port = SysfsPort::new(&config.device.sysfs_base);

    if cli.status {
        print_status(&port);
        return exit_code::SUCCESS;
    }

    // ── Configuração inicial ──
    let snapshot = cli.snapshot();
    if (cli.test || !snapshot.is_empty()) && port.base().is_some() && !is_root() {
        warn!("Sem root: escritas no sysfs provavelmente vão falhar");
    }
    sysfs::apply_snapshot(&mut port, &snapshot);

    // ── Dispositivo ──
    let device_path = Path::new(&config.device.device_path);
    let device = match SimtempDevice::open(device_path) {
        Ok(device) => device,
        Err(e) => {
            error!("{e}");
            return exit_code::STARTUP;
        }
    };

    let interrupt = device.interrupt_handle();
    if let Err(e) = ctrlc::set_handler(move || interrupt.interrupt()) {
        warn!("Falha ao instalar handler de Ctrl+C: {e}");
    }

    let gate = if cli.test {
        // Threshold baixo para gerar mais cruzamentos
        sysfs::arm_self_test(&mut port, config.self_test.threshold_mc);
        SelfTest::armed(config.self_test_deadline())
    } else {
        SelfTest::disabled()
    };

    print_banner(&config, cli.test);

    // ── Loop principal ──
    let stdout = std::io::stdout();
    let mut telemetry = TelemetryLoop::new(device, stdout.lock(), config.poll_timeout())
        .with_self_test(gate);
    let end = telemetry.run();
    // Fecha o device antes de qualquer outra coisa
    drop(telemetry);

    if let Ok(stats) = port.read_stats() {
        info!(
            "Driver: total_samples={} threshold_crossings={}",
            stats.total_samples, stats.threshold_crossings
        );
    }

    end.exit_code()
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(path) = &cli.device {
        config.device.device_path = path.display().to_string();
    }
    if let Some(base) = &cli.sysfs {
        config.device.sysfs_base = base.clone();
    }
    if let Some(secs) = cli.self_test_timeout {
        config.self_test.max_duration_secs = secs;
    }
}

fn print_status(port: &SysfsPort) {
    let Some(base) = port.base() else {
        println!("sysfs desabilitado");
        return;
    };

    println!("{}", base.display());
    for attr in [Attribute::SamplingMs, Attribute::ThresholdMc, Attribute::Mode] {
        match port.read(attr.name()) {
            Ok(value) => {
                if matches!(attr, Attribute::Mode) {
                    if let Err(e) = value.parse::<Mode>() {
                        warn!("Modo fora da enumeração conhecida: {e}");
                    }
                }
                println!("  {attr:<13} {value}");
            }
            Err(e) => {
                warn!("{e}");
                println!("  {attr:<13} ?");
            }
        }
    }
    match port.read_stats() {
        Ok(stats) => {
            println!("  {:<13} {}", "total_samples", stats.total_samples);
            println!("  {:<13} {}", "crossings", stats.threshold_crossings);
        }
        Err(e) => warn!("stats: {e} (precisa de sudo?)"),
    }
}

fn print_banner(config: &AppConfig, self_test: bool) {
    eprintln!();
    eprintln!("══════════════════════════════════════════════");
    eprintln!("   🌡  SIMTEMP CLI – ATIVO");
    eprintln!("══════════════════════════════════════════════");
    eprintln!("  Device:    {}", config.device.device_path);
    eprintln!("  Timeout:   {} ms", config.device.poll_timeout_ms);
    if self_test {
        match config.self_test_deadline() {
            Some(limit) => eprintln!(
                "  Self-test: threshold {} m°C, prazo {:.0}s",
                config.self_test.threshold_mc,
                limit.as_secs_f64()
            ),
            None => eprintln!(
                "  Self-test: threshold {} m°C, sem prazo",
                config.self_test.threshold_mc
            ),
        }
    }
    eprintln!("══════════════════════════════════════════════");
    eprintln!();
}

fn is_root() -> bool {
    // SAFETY: geteuid não tem pré-condições e nunca falha.
    unsafe { libc::geteuid() == 0 }
}
