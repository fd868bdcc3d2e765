//! Supervision of a model process and the socket transport to it.

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::defaults;
use crate::error::{EimrunError, Result};
use crate::runner::Runner;
use crate::runner::protocol::{
    ClassifyRequest, ClassifyResponse, HelloRequest, HelloResponse, ModelParameters, Project,
    ResponseEnvelope,
};
use crate::tempdir;

/// Options for starting a model process.
#[derive(Debug, Clone, Default)]
pub struct RunnerOpts {
    /// Working directory for the model process. Not removed on close.
    /// When unset, a private temporary directory is created and removed on
    /// close.
    pub work_dir: Option<PathBuf>,

    /// When set, the JSON of every request and response is written to this
    /// directory, one file per transaction, named by transaction id and
    /// direction. Write failures are logged and otherwise ignored.
    pub trace_dir: Option<PathBuf>,
}

/// Runner lifecycle. `classify` is only valid in `Ready`; a transport
/// failure moves the runner to the terminal `Failed` state so later calls
/// fail fast instead of re-attempting IO on a misaligned stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Handshaking,
    Ready,
    Failed,
    Closed,
}

struct Shared {
    state: State,
    conn: Option<BufReader<UnixStream>>,
    child: Option<Child>,
    temp_dir: Option<tempfile::TempDir>,
    last_id: u64,
}

impl Shared {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    /// Performs one request/response transaction on the connection.
    ///
    /// A response is one JSON document followed by a `0x00` separator. The
    /// separator can never occur inside JSON, so it doubles as the frame
    /// delimiter: reading up to it consumes the sentinel whether it arrived
    /// together with the document or in a later read.
    fn transact<Req, Resp>(&mut self, id: u64, req: &Req, trace_dir: Option<&Path>) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Serialize + ResponseEnvelope,
    {
        let conn = self.conn.as_mut().ok_or(EimrunError::NotReady)?;

        let mut buf = serde_json::to_vec(req).map_err(|e| EimrunError::Protocol {
            message: format!("encoding request: {e}"),
        })?;
        buf.push(b'\n');
        conn.get_mut()
            .write_all(&buf)
            .map_err(|e| EimrunError::Transport {
                message: format!("writing request to model: {e}"),
            })?;

        write_trace(trace_dir, id, "request", req);

        conn.get_ref()
            .set_read_timeout(Some(defaults::RESPONSE_TIMEOUT))
            .map_err(|e| EimrunError::Transport {
                message: format!("setting read deadline: {e}"),
            })?;

        let mut frame = Vec::new();
        conn.read_until(defaults::MESSAGE_SEPARATOR, &mut frame)
            .map_err(|e| match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => EimrunError::Timeout {
                    seconds: defaults::RESPONSE_TIMEOUT.as_secs(),
                },
                _ => EimrunError::Transport {
                    message: format!("reading response from model: {e}"),
                },
            })?;
        if frame.pop() != Some(defaults::MESSAGE_SEPARATOR) {
            return Err(EimrunError::Transport {
                message: "connection closed mid-response".to_string(),
            });
        }

        let resp: Resp = serde_json::from_slice(&frame).map_err(|e| EimrunError::Protocol {
            message: format!("decoding response from model: {e}"),
        })?;

        write_trace(trace_dir, id, "response", &resp);

        let status = resp.status();
        if !status.success {
            return Err(EimrunError::Model {
                message: status
                    .error
                    .clone()
                    .unwrap_or_else(|| "unspecified model error".to_string()),
            });
        }
        Ok(resp)
    }

    fn hello(&mut self, trace_dir: Option<&Path>) -> Result<(ModelParameters, Project)> {
        let id = self.next_id();
        let resp: HelloResponse = self.transact(id, &HelloRequest::new(id), trace_dir)?;
        let mut params = resp.model_parameters;
        params.resolve();
        Ok((params, resp.project))
    }

    /// Releases everything this runner owns. Safe to call repeatedly and
    /// after a partially failed construction.
    fn teardown(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.conn = None;
        // Dropping the handle removes the private temp dir.
        self.temp_dir = None;
        self.state = State::Closed;
    }
}

/// A model process reachable over its Unix socket.
///
/// Created once per model process; destroyed exactly once via the
/// idempotent [`ProcessRunner::close`] (also run on drop). Only one
/// transaction is ever in flight: the socket is a single ordered stream
/// with no multiplexing, so the whole request/response round trip runs
/// under one lock and responses correlate to requests by FIFO order.
pub struct ProcessRunner {
    params: ModelParameters,
    project: Project,
    opts: RunnerOpts,
    shared: Mutex<Shared>,
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner").finish_non_exhaustive()
    }
}

impl ProcessRunner {
    /// Starts the model executable at `model_path` and performs the hello
    /// handshake.
    ///
    /// The executable is started with a single positional argument naming
    /// the socket file it must create inside its working directory. The
    /// socket is polled for [`defaults::SOCKET_RETRY_LIMIT`] attempts;
    /// a socket that never appears fails with
    /// [`EimrunError::StartupTimeout`], while any connect error other than
    /// "not found yet" fails immediately.
    ///
    /// On any failure the partially started process and its temporary
    /// directory are cleaned up before returning.
    pub fn start(model_path: impl AsRef<Path>, opts: RunnerOpts) -> Result<Self> {
        let model_path = std::path::absolute(model_path.as_ref())?;

        let mut shared = Shared {
            state: State::Created,
            conn: None,
            child: None,
            temp_dir: None,
            last_id: 0,
        };

        match Self::launch(&mut shared, &model_path, &opts) {
            Ok((params, project)) => Ok(ProcessRunner {
                params,
                project,
                opts,
                shared: Mutex::new(shared),
            }),
            Err(e) => {
                shared.teardown();
                Err(e)
            }
        }
    }

    fn launch(
        shared: &mut Shared,
        model_path: &Path,
        opts: &RunnerOpts,
    ) -> Result<(ModelParameters, Project)> {
        let work_dir = match &opts.work_dir {
            Some(dir) => dir.clone(),
            None => {
                let dir = tempdir::temp_dir()?;
                let path = dir.path().to_path_buf();
                shared.temp_dir = Some(dir);
                path
            }
        };

        let child = Command::new(model_path)
            .arg(defaults::SOCKET_FILE_NAME)
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| EimrunError::Transport {
                message: format!("starting model process {}: {e}", model_path.display()),
            })?;
        shared.child = Some(child);

        let socket_path = work_dir.join(defaults::SOCKET_FILE_NAME);
        let stream = wait_for_socket(&socket_path)?;
        shared.conn = Some(BufReader::new(stream));

        shared.state = State::Handshaking;
        let (params, project) = shared.hello(opts.trace_dir.as_deref())?;
        shared.state = State::Ready;
        Ok((params, project))
    }

    /// Shuts down the runner: kills the model process, closes the socket,
    /// and removes the private temporary directory. Idempotent.
    pub fn close(&self) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.teardown();
    }

    #[cfg(test)]
    fn from_stream(stream: UnixStream, params: ModelParameters, opts: RunnerOpts) -> Self {
        ProcessRunner {
            params,
            project: Project::default(),
            opts,
            shared: Mutex::new(Shared {
                state: State::Ready,
                conn: Some(BufReader::new(stream)),
                child: None,
                temp_dir: None,
                // The hello transaction holds id 1.
                last_id: 1,
            }),
        }
    }
}

impl Runner for ProcessRunner {
    fn model_parameters(&self) -> &ModelParameters {
        &self.params
    }

    fn project(&self) -> &Project {
        &self.project
    }

    fn classify(&self, features: &[f64]) -> Result<ClassifyResponse> {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if shared.state != State::Ready {
            return Err(EimrunError::NotReady);
        }
        let id = shared.next_id();
        let req = ClassifyRequest {
            id,
            classify: features,
        };
        let result = shared.transact(id, &req, self.opts.trace_dir.as_deref());
        match &result {
            // A timed-out response may still arrive later and would
            // misalign the FIFO correlation, so the transport cannot be
            // trusted after either failure.
            Err(EimrunError::Transport { .. }) | Err(EimrunError::Timeout { .. }) => {
                shared.state = State::Failed;
            }
            _ => {}
        }
        result
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Polls the socket until the model process has created it.
fn wait_for_socket(path: &Path) -> Result<UnixStream> {
    for _ in 0..defaults::SOCKET_RETRY_LIMIT {
        match UnixStream::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                thread::sleep(defaults::SOCKET_RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(EimrunError::Transport {
                    message: format!("opening runner socket: {e}"),
                });
            }
        }
    }
    Err(EimrunError::StartupTimeout {
        socket: path.to_path_buf(),
    })
}

fn write_trace<T: Serialize>(trace_dir: Option<&Path>, id: u64, direction: &str, message: &T) {
    let Some(dir) = trace_dir else {
        return;
    };
    let path = dir.join(format!("runner-{id}-{direction}.json"));
    let json = match serde_json::to_vec(message) {
        Ok(json) => json,
        Err(e) => {
            warn!("trace, encoding {}: {e}", path.display());
            return;
        }
    };
    if let Err(e) = std::fs::write(&path, json) {
        warn!("trace, writing {}: {e}", path.display());
        return;
    }
    debug!("trace {}", path.display());
}
