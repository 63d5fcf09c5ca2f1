//! Host objects bound into a script for one call
//!
//! Objects that reach live resources (the session and the streams) can be
//! closed. A closed object refuses every call, so a script that stashes one
//! in a global cannot touch the previous task's session later.

use std::any::Any;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::interpreter::errors::{self, ErrorInfo};
use crate::interpreter::values::json_to_val;
use crate::interpreter::{HostObject, Val};
use crate::session::{ProcessSession, Record, Relationship};

pub const SESSION: &str = "session";
pub const CONTEXT: &str = "context";
pub const LOG: &str = "log";
pub const REL_SUCCESS: &str = "REL_SUCCESS";
pub const REL_FAILURE: &str = "REL_FAILURE";
pub const INPUT_STREAM: &str = "inputStream";
pub const OUTPUT_STREAM: &str = "outputStream";

/// Named objects injected for one execution
pub trait Bindings {
    /// Handed back to the caller once the script is done
    type Output;

    fn entries(&self) -> Vec<(&'static str, Val)>;

    /// Revoke access to live resources
    fn close(&self);

    /// Give the caller its resources back; runs after `close`
    fn finish(self) -> Self::Output;
}

/* ===================== Argument Helpers ===================== */

fn expect_args(method: &str, args: &[Val], n: usize) -> Result<(), ErrorInfo> {
    if args.len() != n {
        return Err(ErrorInfo::wrong_arg_count(method, n, args.len()));
    }
    Ok(())
}

fn record_id(method: &str, value: &Val) -> Result<String, ErrorInfo> {
    match value {
        Val::Str(id) => Ok(id.clone()),
        other => other
            .as_host::<RecordRef>()
            .map(|r| r.id.clone())
            .ok_or_else(|| ErrorInfo::wrong_arg_type(method, "a record")),
    }
}

fn content_bytes(method: &str, value: &Val) -> Result<Vec<u8>, ErrorInfo> {
    match value {
        Val::Bytes(b) => Ok(b.clone()),
        Val::Str(s) => Ok(s.as_bytes().to_vec()),
        _ => Err(ErrorInfo::wrong_arg_type(method, "bytes or a string")),
    }
}

fn string_arg(method: &str, value: &Val) -> Result<String, ErrorInfo> {
    match value {
        Val::Str(s) => Ok(s.clone()),
        _ => Err(ErrorInfo::wrong_arg_type(method, "a string")),
    }
}

fn relationship_arg(method: &str, value: &Val) -> Result<Relationship, ErrorInfo> {
    if let Some(rel) = value.as_host::<RelationshipObject>() {
        return Ok(rel.0);
    }
    match value {
        Val::Str(s) if s == "success" => Ok(Relationship::Success),
        Val::Str(s) if s == "failure" => Ok(Relationship::Failure),
        _ => Err(ErrorInfo::wrong_arg_type(method, "a relationship")),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/* ===================== Session ===================== */

/// Script view of the session
pub struct SessionObject {
    session: Arc<dyn ProcessSession>,
    open: AtomicBool,
}

impl std::fmt::Debug for SessionObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionObject")
            .field("open", &self.open.load(Ordering::Acquire))
            .finish()
    }
}

impl SessionObject {
    pub fn new(session: Arc<dyn ProcessSession>) -> Self {
        Self {
            session,
            open: AtomicBool::new(true),
        }
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn record_val(record: Record) -> Val {
        Val::host(RecordRef { id: record.id })
    }
}

impl HostObject for SessionObject {
    fn type_name(&self) -> &'static str {
        "Session"
    }

    fn call(&self, method: &str, args: Vec<Val>) -> Result<Val, ErrorInfo> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ErrorInfo::host("session is no longer available"));
        }
        let session = &self.session;
        let host_err = |e: crate::error::SessionError| ErrorInfo::host(e.to_string());

        match method {
            "get" => {
                expect_args(method, &args, 0)?;
                Ok(session
                    .get()
                    .map_err(host_err)?
                    .map(Self::record_val)
                    .unwrap_or(Val::Null))
            }
            "create" => {
                expect_args(method, &args, 0)?;
                Ok(Self::record_val(session.create().map_err(host_err)?))
            }
            "read" => {
                expect_args(method, &args, 1)?;
                let id = record_id(method, &args[0])?;
                Ok(Val::Bytes(session.read(&id).map_err(host_err)?))
            }
            "readText" => {
                expect_args(method, &args, 1)?;
                let id = record_id(method, &args[0])?;
                let bytes = session.read(&id).map_err(host_err)?;
                String::from_utf8(bytes)
                    .map(Val::Str)
                    .map_err(|_| ErrorInfo::new(errors::TYPE_ERROR, "record content is not UTF-8"))
            }
            "write" => {
                expect_args(method, &args, 2)?;
                let id = record_id(method, &args[0])?;
                let content = content_bytes(method, &args[1])?;
                session.write(&id, content).map_err(host_err)?;
                Ok(args[0].clone())
            }
            "attribute" => {
                expect_args(method, &args, 2)?;
                let id = record_id(method, &args[0])?;
                let name = string_arg(method, &args[1])?;
                Ok(session
                    .attribute(&id, &name)
                    .map_err(host_err)?
                    .map(Val::Str)
                    .unwrap_or(Val::Null))
            }
            "putAttribute" => {
                expect_args(method, &args, 3)?;
                let id = record_id(method, &args[0])?;
                let name = string_arg(method, &args[1])?;
                let value = args[2].to_display_string();
                session.put_attribute(&id, &name, value).map_err(host_err)?;
                Ok(args[0].clone())
            }
            "transfer" => {
                expect_args(method, &args, 2)?;
                let id = record_id(method, &args[0])?;
                let relationship = relationship_arg(method, &args[1])?;
                session.transfer(&id, relationship).map_err(host_err)?;
                Ok(Val::Null)
            }
            "remove" => {
                expect_args(method, &args, 1)?;
                let id = record_id(method, &args[0])?;
                session.remove(&id).map_err(host_err)?;
                Ok(Val::Null)
            }
            _ => Err(ErrorInfo::new(
                errors::PROPERTY_NOT_FOUND,
                format!("Session has no method '{}'", method),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Handle to a record inside the session
#[derive(Debug, Clone)]
pub struct RecordRef {
    pub id: String,
}

impl HostObject for RecordRef {
    fn type_name(&self) -> &'static str {
        "Record"
    }

    fn get(&self, property: &str) -> Option<Val> {
        (property == "id").then(|| Val::Str(self.id.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `REL_SUCCESS` / `REL_FAILURE`
#[derive(Debug, Clone, Copy)]
pub struct RelationshipObject(pub Relationship);

impl HostObject for RelationshipObject {
    fn type_name(&self) -> &'static str {
        "Relationship"
    }

    fn get(&self, property: &str) -> Option<Val> {
        (property == "name").then(|| Val::Str(self.0.name().to_string()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/* ===================== Context ===================== */

/// Stage configuration visible to scripts
#[derive(Debug, Clone)]
pub struct ContextObject {
    properties: Arc<BTreeMap<String, serde_json::Value>>,
    max_concurrent_tasks: usize,
}

impl ContextObject {
    pub fn new(properties: Arc<BTreeMap<String, serde_json::Value>>, max_concurrent_tasks: usize) -> Self {
        Self {
            properties,
            max_concurrent_tasks,
        }
    }
}

impl HostObject for ContextObject {
    fn type_name(&self) -> &'static str {
        "Context"
    }

    fn get(&self, property: &str) -> Option<Val> {
        match property {
            "maxConcurrentTasks" => Some(Val::Num(self.max_concurrent_tasks as f64)),
            _ => None,
        }
    }

    fn call(&self, method: &str, args: Vec<Val>) -> Result<Val, ErrorInfo> {
        match method {
            "property" => {
                expect_args(method, &args, 1)?;
                let name = string_arg(method, &args[0])?;
                Ok(self
                    .properties
                    .get(&name)
                    .map(json_to_val)
                    .unwrap_or(Val::Null))
            }
            _ => Err(ErrorInfo::new(
                errors::PROPERTY_NOT_FOUND,
                format!("Context has no method '{}'", method),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/* ===================== Log ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Leveled log sink for one component
pub trait ComponentLog: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards to `tracing`, tagged with the component name
#[derive(Debug, Clone)]
pub struct TracingLog {
    component: String,
}

impl TracingLog {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }
}

impl ComponentLog for TracingLog {
    fn log(&self, level: LogLevel, message: &str) {
        let component = self.component.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(component, "{}", message),
            LogLevel::Info => tracing::info!(component, "{}", message),
            LogLevel::Warn => tracing::warn!(component, "{}", message),
            LogLevel::Error => tracing::error!(component, "{}", message),
        }
    }
}

/// Script view of the component log; arguments are joined with spaces
#[derive(Clone)]
pub struct LogObject {
    log: Arc<dyn ComponentLog>,
}

impl std::fmt::Debug for LogObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LogObject")
    }
}

impl LogObject {
    pub fn new(log: Arc<dyn ComponentLog>) -> Self {
        Self { log }
    }
}

impl HostObject for LogObject {
    fn type_name(&self) -> &'static str {
        "Log"
    }

    fn call(&self, method: &str, args: Vec<Val>) -> Result<Val, ErrorInfo> {
        let level = match method {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => {
                return Err(ErrorInfo::new(
                    errors::PROPERTY_NOT_FOUND,
                    format!("Log has no method '{}'", method),
                ))
            }
        };
        let message = args
            .iter()
            .map(Val::to_display_string)
            .collect::<Vec<_>>()
            .join(" ");
        self.log.log(level, &message);
        Ok(Val::Null)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/* ===================== Streams ===================== */

/// Readable side of the stream variant
pub struct InputStream {
    reader: Mutex<Option<Box<dyn Read + Send>>>,
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InputStream")
    }
}

impl InputStream {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
        }
    }

    pub fn close(&self) {
        lock(&self.reader).take();
    }

    fn read_with(
        &self,
        f: impl FnOnce(&mut dyn Read) -> std::io::Result<Vec<u8>>,
    ) -> Result<Vec<u8>, ErrorInfo> {
        let mut guard = lock(&self.reader);
        let reader = guard
            .as_mut()
            .ok_or_else(|| ErrorInfo::host("input stream is closed"))?;
        f(reader.as_mut()).map_err(|e| ErrorInfo::host(format!("read failed: {}", e)))
    }
}

impl HostObject for InputStream {
    fn type_name(&self) -> &'static str {
        "InputStream"
    }

    fn call(&self, method: &str, args: Vec<Val>) -> Result<Val, ErrorInfo> {
        match method {
            // read() drains the stream; read(n) returns at most n bytes, empty at EOF
            "read" => {
                let limit = match args.as_slice() {
                    [] => None,
                    [Val::Num(n)] if *n >= 0.0 => Some(*n as usize),
                    [_] => return Err(ErrorInfo::wrong_arg_type(method, "a byte count")),
                    _ => return Err(ErrorInfo::wrong_arg_count(method, 1, args.len())),
                };
                let bytes = self.read_with(|reader| {
                    let mut buf = Vec::new();
                    match limit {
                        Some(n) => reader.take(n as u64).read_to_end(&mut buf)?,
                        None => reader.read_to_end(&mut buf)?,
                    };
                    Ok(buf)
                })?;
                Ok(Val::Bytes(bytes))
            }
            "readText" => {
                expect_args(method, &args, 0)?;
                let bytes = self.read_with(|reader| {
                    let mut buf = Vec::new();
                    reader.read_to_end(&mut buf)?;
                    Ok(buf)
                })?;
                String::from_utf8(bytes)
                    .map(Val::Str)
                    .map_err(|_| ErrorInfo::new(errors::TYPE_ERROR, "input is not UTF-8"))
            }
            _ => Err(ErrorInfo::new(
                errors::PROPERTY_NOT_FOUND,
                format!("InputStream has no method '{}'", method),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Writable side of the stream variant
///
/// Closing revokes script access but keeps the writer, which the caller
/// collects with [`OutputStream::take`].
pub struct OutputStream<W> {
    writer: Mutex<Option<W>>,
    open: AtomicBool,
}

impl<W> std::fmt::Debug for OutputStream<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OutputStream")
    }
}

impl<W: Write + Send + 'static> OutputStream<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            open: AtomicBool::new(true),
        }
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Close the stream and return the writer
    pub fn take(&self) -> Option<W> {
        self.close();
        lock(&self.writer).take()
    }
}

impl<W: Write + Send + 'static> HostObject for OutputStream<W> {
    fn type_name(&self) -> &'static str {
        "OutputStream"
    }

    fn call(&self, method: &str, args: Vec<Val>) -> Result<Val, ErrorInfo> {
        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .filter(|_| self.is_open())
            .ok_or_else(|| ErrorInfo::host("output stream is closed"))?;
        let io_err = |e: std::io::Error| ErrorInfo::host(format!("write failed: {}", e));

        match method {
            "write" => {
                expect_args(method, &args, 1)?;
                let bytes = content_bytes(method, &args[0])?;
                writer.write_all(&bytes).map_err(io_err)?;
                Ok(Val::Num(bytes.len() as f64))
            }
            "flush" => {
                expect_args(method, &args, 0)?;
                writer.flush().map_err(io_err)?;
                Ok(Val::Null)
            }
            _ => Err(ErrorInfo::new(
                errors::PROPERTY_NOT_FOUND,
                format!("OutputStream has no method '{}'", method),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/* ===================== Binding Sets ===================== */

/// Context for the record variant
pub struct TaskBindings {
    pub session: Arc<SessionObject>,
    pub context: Arc<ContextObject>,
    pub log: Arc<LogObject>,
}

impl TaskBindings {
    pub fn new(session: Arc<dyn ProcessSession>, context: ContextObject, log: LogObject) -> Self {
        Self {
            session: Arc::new(SessionObject::new(session)),
            context: Arc::new(context),
            log: Arc::new(log),
        }
    }
}

impl Bindings for TaskBindings {
    type Output = ();

    fn entries(&self) -> Vec<(&'static str, Val)> {
        vec![
            (SESSION, Val::Host(self.session.clone())),
            (CONTEXT, Val::Host(self.context.clone())),
            (LOG, Val::Host(self.log.clone())),
            (REL_SUCCESS, Val::host(RelationshipObject(Relationship::Success))),
            (REL_FAILURE, Val::host(RelationshipObject(Relationship::Failure))),
        ]
    }

    fn close(&self) {
        self.session.close();
    }

    fn finish(self) {}
}

/// Context for the stream variant
pub struct StreamBindings<W> {
    pub input: Arc<InputStream>,
    pub output: Arc<OutputStream<W>>,
    pub log: Arc<LogObject>,
}

impl<W: Write + Send + 'static> StreamBindings<W> {
    pub fn new(input: impl Read + Send + 'static, output: W, log: LogObject) -> Self {
        Self {
            input: Arc::new(InputStream::new(input)),
            output: Arc::new(OutputStream::new(output)),
            log: Arc::new(log),
        }
    }
}

impl<W: Write + Send + 'static> Bindings for StreamBindings<W> {
    type Output = Option<W>;

    fn entries(&self) -> Vec<(&'static str, Val)> {
        vec![
            (INPUT_STREAM, Val::Host(self.input.clone())),
            (OUTPUT_STREAM, Val::Host(self.output.clone())),
            (LOG, Val::Host(self.log.clone())),
        ]
    }

    fn close(&self) {
        self.input.close();
        self.output.close();
    }

    fn finish(self) -> Option<W> {
        self.output.take()
    }
}
