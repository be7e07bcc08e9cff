//! Python bindings for the PHY sequencer
//!
//! Host-side tooling uses these to build and inspect programs, check CRCs,
//! run programs against the simulator and decode post-mortem records.

use std::collections::HashMap;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict};

use crate::config::SequencerConfig;
use crate::crc::crc32_words;
use crate::diagnostics::Diagnostics;
use crate::encoder::{Encoder, RecordingBackend};
use crate::error::{code_name, SequencerError};
use crate::program::Program;
use crate::session::{Outcome, Session};
use crate::sim::SimPlatform;
use crate::topology::PartitionInfo;

fn sequencer_err(e: SequencerError) -> PyErr {
    PyRuntimeError::new_err(format!("{} ({})", e, e.name()))
}

/// CRC-32 of a list of words, least-significant byte first
///
/// Example:
///     >>> hex(crc32([0x0F000000]))
#[pyfunction]
fn crc32(words: Vec<u32>) -> u32 {
    crc32_words(&words)
}

/// A sealed, CRC-protected sequencer program
#[pyclass(name = "Program")]
#[derive(Clone)]
struct PyProgram {
    inner: Program,
}

#[pymethods]
impl PyProgram {
    /// Validate raw words (header and CRC included)
    ///
    /// Raises:
    ///     ValueError: If the header or CRC is wrong
    #[staticmethod]
    fn from_words(words: Vec<u32>) -> PyResult<PyProgram> {
        Program::from_words(words)
            .map(|inner| PyProgram { inner })
            .map_err(|e| PyValueError::new_err(format!("Invalid program: {}", e)))
    }

    /// Every program word
    #[getter]
    fn words(&self) -> Vec<u32> {
        self.inner.words().to_vec()
    }

    /// Declared length in words
    #[getter]
    fn length(&self) -> usize {
        self.inner.length()
    }

    #[getter]
    fn crc(&self) -> u32 {
        self.inner.stored_crc()
    }

    /// One line per instruction
    fn disassemble(&self) -> String {
        self.inner.to_string()
    }

    /// Serialize the program to protobuf bytes
    fn to_bytes<'py>(&self, py: Python<'py>) -> Bound<'py, PyBytes> {
        PyBytes::new(py, &self.inner.to_proto_bytes())
    }

    /// Deserialize a program from protobuf bytes
    ///
    /// Raises:
    ///     RuntimeError: If deserialization fails
    #[staticmethod]
    fn from_bytes(data: &[u8]) -> PyResult<PyProgram> {
        Program::from_proto_bytes(data)
            .map(|inner| PyProgram { inner })
            .map_err(|e| PyRuntimeError::new_err(format!("Deserialization error: {}", e)))
    }

    fn __len__(&self) -> usize {
        self.inner.length()
    }

    fn __repr__(&self) -> String {
        format!(
            "<Program length={} crc={:#010x}>",
            self.inner.length(),
            self.inner.stored_crc()
        )
    }
}

/// Records register operations into a program
///
/// Example:
///     >>> rec = Recorder()
///     >>> rec.store(0x100, 0xAAAA)
///     >>> program = rec.finish()
#[pyclass(name = "Recorder")]
struct PyRecorder {
    encoder: Option<Encoder<RecordingBackend>>,
}

impl PyRecorder {
    fn encoder(&mut self) -> PyResult<&mut Encoder<RecordingBackend>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| PyRuntimeError::new_err("Recorder already finished"))
    }
}

#[pymethods]
impl PyRecorder {
    #[new]
    #[pyo3(signature = (tick_ns=None))]
    fn new(tick_ns: Option<u32>) -> Self {
        let mut config = SequencerConfig::default();
        if let Some(tick_ns) = tick_ns {
            config = config.with_tick_ns(tick_ns);
        }
        PyRecorder {
            encoder: Some(Encoder::recording(config)),
        }
    }

    fn store(&mut self, addr: u32, value: u32) -> PyResult<()> {
        self.encoder()?.emit_store(addr, value).map_err(sequencer_err)
    }

    fn stalling_store(&mut self, addr: u32, value: u32) -> PyResult<()> {
        self.encoder()?
            .emit_stalling_store(addr, value)
            .map_err(sequencer_err)
    }

    fn rmw(&mut self, addr: u32, value: u32, mask: u32) -> PyResult<()> {
        self.encoder()?.emit_rmw(addr, value, mask).map_err(sequencer_err)
    }

    fn rmw_lower(&mut self, addr: u32, value: u32, mask: u32) -> PyResult<()> {
        self.encoder()?
            .emit_rmw_lower(addr, value, mask)
            .map_err(sequencer_err)
    }

    fn poll(&mut self, addr: u32, value: u32, mask: u32) -> PyResult<()> {
        self.encoder()?.emit_poll(addr, value, mask).map_err(sequencer_err)
    }

    fn wait_ns(&mut self, ns: u64) -> PyResult<()> {
        self.encoder()?.emit_wait_ns(ns).map_err(sequencer_err)
    }

    fn training_check(&mut self, addr: u32) -> PyResult<()> {
        self.encoder()?
            .emit_training_check(addr)
            .map_err(sequencer_err)
    }

    /// Stalls inserted so far after PHY hazard writes
    #[getter]
    fn stalls_inserted(&self) -> usize {
        self.encoder
            .as_ref()
            .map_or(0, |encoder| encoder.backend().stalls_inserted())
    }

    /// Close the program; the recorder cannot be used afterwards
    fn finish(&mut self) -> PyResult<PyProgram> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| PyRuntimeError::new_err("Recorder already finished"))?;
        encoder
            .finish()
            .map(|inner| PyProgram { inner })
            .map_err(sequencer_err)
    }

    fn __repr__(&self) -> String {
        match &self.encoder {
            Some(encoder) => format!("<Recorder words={}>", encoder.backend().len()),
            None => "<Recorder finished>".to_string(),
        }
    }
}

fn post_mortem_dict<'py>(py: Python<'py>, diag: &Diagnostics) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("error", diag.code_name())?;
    dict.set_item("code", diag.code)?;
    dict.set_item("index", diag.index)?;
    dict.set_item("word", diag.word)?;
    dict.set_item("operands", (diag.operand_a, diag.operand_b))?;
    dict.set_item("message", &diag.message)?;
    dict.set_item("elapsed_ns", diag.elapsed.map(|d| d.as_nanos() as u64))?;
    Ok(dict)
}

/// Run a program through the handshake against the simulator
///
/// Args:
///     program: Program to run
///     registers: Initial register values, {addr: value}
///     half_subpartition: Run as a partition without the lower sub-partition
///     poll_timeout_ns: Poll budget override
///     max_steps: Satellite steps (one slice of platform time each) before
///         the run is reported unresponsive
///
/// Returns:
///     dict: outcome ("completed", "failed" or "unresponsive"), the writes
///     performed as (addr, value, blocking) tuples, and a post-mortem on failure
#[pyfunction]
#[pyo3(signature = (program, registers=None, half_subpartition=false, poll_timeout_ns=None, max_steps=crate::session::DEFAULT_STEP_BUDGET))]
fn simulate<'py>(
    py: Python<'py>,
    program: &PyProgram,
    registers: Option<HashMap<u32, u32>>,
    half_subpartition: bool,
    poll_timeout_ns: Option<u64>,
    max_steps: usize,
) -> PyResult<Bound<'py, PyDict>> {
    let mut sim = SimPlatform::new();
    for (addr, value) in registers.unwrap_or_default() {
        sim.preset(addr, value);
    }
    let partition = if half_subpartition {
        PartitionInfo::half(0)
    } else {
        PartitionInfo::full(0)
    };
    let mut config = SequencerConfig::default();
    if let Some(timeout) = poll_timeout_ns {
        config = config
            .with_poll_timeout_ns(timeout)
            .with_training_timeout_ns(timeout);
    }

    let mut session = Session::new(sim, partition, config);
    let outcome = session
        .execute(&program.inner, max_steps)
        .map_err(|e| PyRuntimeError::new_err(format!("Handshake error: {}", e)))?;

    let dict = PyDict::new(py);
    let writes: Vec<(u32, u32, bool)> = session
        .platform()
        .writes()
        .iter()
        .map(|w| (w.addr, w.value, w.blocking))
        .collect();
    dict.set_item("writes", writes)?;

    match outcome {
        Outcome::Completed(summary) => {
            dict.set_item("outcome", "completed")?;
            dict.set_item("instructions", summary.instructions)?;
            dict.set_item("skipped", summary.skipped)?;
            dict.set_item("elapsed_ns", summary.elapsed_ns)?;
        }
        Outcome::Failed { code, diagnostics } => {
            dict.set_item("outcome", "failed")?;
            dict.set_item("error", code_name(code))?;
            if let Some(diag) = diagnostics {
                dict.set_item("post_mortem", post_mortem_dict(py, &diag)?)?;
            }
        }
        Outcome::Unresponsive { last_seen } => {
            dict.set_item("outcome", "unresponsive")?;
            dict.set_item("last_seen", format!("{:?}", last_seen))?;
        }
    }
    Ok(dict)
}

/// Decode a serialized post-mortem record
///
/// Raises:
///     ValueError: If the bytes are not a post-mortem record
#[pyfunction]
fn decode_post_mortem<'py>(py: Python<'py>, data: &[u8]) -> PyResult<Bound<'py, PyDict>> {
    let diag = Diagnostics::from_proto_bytes(data)
        .map_err(|e| PyValueError::new_err(format!("Invalid post-mortem: {}", e)))?;
    post_mortem_dict(py, &diag)
}

/// Python module definition
#[pymodule]
fn _physeq(m: &Bound<'_, pyo3::types::PyModule>) -> PyResult<()> {
    // Add functions
    m.add_function(wrap_pyfunction!(crc32, m)?)?;
    m.add_function(wrap_pyfunction!(simulate, m)?)?;
    m.add_function(wrap_pyfunction!(decode_post_mortem, m)?)?;

    // Add classes
    m.add_class::<PyProgram>()?;
    m.add_class::<PyRecorder>()?;

    // Add version constant
    m.add("BYTECODE_VERSION", crate::BYTECODE_VERSION)?;

    Ok(())
}
