//! Fonte de eventos: `/dev/simtemp` aberto em modo bloqueante + `poll(2)`.
//!
//! O poll é o único ponto de suspensão do programa. Além do device, o
//! conjunto de fds inclui a ponta de leitura de um par de sockets usado como
//! self-pipe: [`InterruptHandle::interrupt`] escreve um byte e a espera em
//! andamento retorna na hora com [`WaitOutcome::Interrupted`].

use crate::record::RECORD_SIZE;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEVICE_SLOT: usize = 0;
const WAKE_SLOT: usize = 1;

/// Erros do dispositivo. Todos são fatais para o loop.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Falha ao abrir {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Falha ao criar canal de interrupção: {0}")]
    WakePipe(#[source] io::Error),

    #[error("Falha no poll: {0}")]
    Poll(#[source] io::Error),

    #[error("Falha na leitura: {0}")]
    Read(#[source] io::Error),

    #[error("Condição de erro no dispositivo ({0})")]
    Fault(Conditions),
}

/// Condições sinalizadas pelo poll para o device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conditions {
    pub readable: bool,
    pub priority: bool,
    pub hangup: bool,
    /// `POLLERR` ou `POLLNVAL`
    pub error: bool,
}

impl Conditions {
    pub fn from_revents(revents: libc::c_short) -> Self {
        Self {
            readable: revents & libc::POLLIN != 0,
            priority: revents & libc::POLLPRI != 0,
            hangup: revents & libc::POLLHUP != 0,
            error: revents & (libc::POLLERR | libc::POLLNVAL) != 0,
        }
    }

    #[cfg(test)]
    pub(crate) const fn readable() -> Self {
        Self {
            readable: true,
            priority: false,
            hangup: false,
            error: false,
        }
    }

    /// Hangup/erro: o handle está quebrado, não tentar ler.
    pub fn is_fault(&self) -> bool {
        self.hangup || self.error
    }

    pub fn has_data(&self) -> bool {
        self.readable || self.priority
    }
}

impl fmt::Display for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.readable, "IN"),
            (self.priority, "PRI"),
            (self.hangup, "HUP"),
            (self.error, "ERR"),
        ];
        let set: Vec<&str> = names.iter().filter(|(on, _)| *on).map(|(_, n)| *n).collect();
        if set.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&set.join("|"))
        }
    }
}

/// Resultado de uma espera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Nenhuma condição na janela. Não é erro.
    TimedOut,
    /// Pedido de encerramento (Ctrl+C).
    Interrupted,
    Ready(Conditions),
}

/// Canal de bytes com leitura guiada por prontidão.
pub trait EventSource {
    /// Registra interesse em readable + priority-readable. Chamado uma vez.
    fn register_interest(&mut self) -> Result<(), DeviceError>;

    /// Bloqueia até `timeout` esperando alguma condição registrada.
    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, DeviceError>;

    /// Exatamente um `read` do tamanho de um registro. Retorna os bytes lidos.
    fn read_record(&mut self, buf: &mut [u8; RECORD_SIZE]) -> Result<usize, DeviceError>;
}

/// Sessão aberta com o device. O fd é fechado no `Drop`, em qualquer saída.
pub struct SimtempDevice {
    file: File,
    label: String,
    wake_rx: UnixStream,
    wake_tx: Arc<UnixStream>,
    fds: Vec<libc::pollfd>,
}

impl SimtempDevice {
    /// Abre o device somente leitura, em modo bloqueante.
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|source| DeviceError::Open {
                path: path.display().to_string(),
                source,
            })?;
        let device = Self::from_file(file, path.display().to_string())?;
        info!("Dispositivo {} aberto", device.label);
        Ok(device)
    }

    /// Envolve um handle já aberto (pipe, socket, char device).
    pub fn from_file(file: File, label: impl Into<String>) -> Result<Self, DeviceError> {
        let (wake_rx, wake_tx) = UnixStream::pair().map_err(DeviceError::WakePipe)?;
        // O handler de sinal nunca pode bloquear, e o dreno também não.
        wake_rx.set_nonblocking(true).map_err(DeviceError::WakePipe)?;
        wake_tx.set_nonblocking(true).map_err(DeviceError::WakePipe)?;

        Ok(Self {
            file,
            label: label.into(),
            wake_rx,
            wake_tx: Arc::new(wake_tx),
            fds: Vec::with_capacity(2),
        })
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            tx: Arc::clone(&self.wake_tx),
        }
    }

    fn drain_wake(&mut self) {
        let mut scratch = [0u8; 64];
        while matches!(self.wake_rx.read(&mut scratch), Ok(n) if n > 0) {}
    }
}

impl EventSource for SimtempDevice {
    fn register_interest(&mut self) -> Result<(), DeviceError> {
        if !self.fds.is_empty() {
            return Ok(());
        }
        self.fds.push(libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        });
        self.fds.push(libc::pollfd {
            fd: self.wake_rx.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        debug!("Interesse POLLIN|POLLPRI registrado em {}", self.label);
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, DeviceError> {
        self.register_interest()?;
        // Arredonda para cima: um resto abaixo de 1 ms não vira poll(0) em loop.
        let timeout_ms =
            timeout.as_micros().div_ceil(1000).min(libc::c_int::MAX as u128) as libc::c_int;

        loop {
            for pfd in &mut self.fds {
                pfd.revents = 0;
            }

            // SAFETY: `fds` é um Vec válido de pollfd e o tamanho passado é o dele;
            // os fds pertencem a `file` e `wake_rx`, vivos enquanto `self` vive.
            let ret = unsafe {
                libc::poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as libc::nfds_t,
                    timeout_ms,
                )
            };

            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    // Sinal sem pedido de parada: a janela recomeça.
                    continue;
                }
                return Err(DeviceError::Poll(err));
            }
            if ret == 0 {
                return Ok(WaitOutcome::TimedOut);
            }
            if self.fds[WAKE_SLOT].revents != 0 {
                self.drain_wake();
                return Ok(WaitOutcome::Interrupted);
            }
            return Ok(WaitOutcome::Ready(Conditions::from_revents(
                self.fds[DEVICE_SLOT].revents,
            )));
        }
    }

    fn read_record(&mut self, buf: &mut [u8; RECORD_SIZE]) -> Result<usize, DeviceError> {
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            // Prontidão perdida entre o poll e o read: conta como leitura curta.
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(DeviceError::Read(e)),
        }
    }
}

impl Drop for SimtempDevice {
    fn drop(&mut self) {
        debug!("Fechando {}", self.label);
    }
}

/// Acorda a espera do loop a partir de outra thread (handler do Ctrl+C).
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Arc<UnixStream>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        // WouldBlock = buffer cheio = já existe um pedido pendente.
        let _ = (&*self.tx).write(&[1]);
    }
}
