//! Binding environment for one plan execution
//!
//! External parameters form the outermost scope. Each `Let` pushes a frame;
//! lookups walk frames innermost-first and fall back to the parameters.
//! Frames own their values, and values never point back into the
//! environment.

use smallvec::SmallVec;
use sluice_core::{Error, Record, Result, Value};

type Frame = SmallVec<[(String, Value); 4]>;

/// Scoped name -> value bindings
#[derive(Debug, Clone, Default)]
pub struct Environment {
    params: Record,
    frames: Vec<Frame>,
}

impl Environment {
    /// Environment over external parameters
    pub fn new(params: Record) -> Self {
        Environment {
            params,
            frames: Vec::new(),
        }
    }

    /// External parameters
    pub fn params(&self) -> &Record {
        &self.params
    }

    /// Number of open frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Open a frame
    pub fn push_frame(&mut self) {
        self.frames.push(Frame::new());
    }

    /// Close the innermost frame, dropping its bindings
    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Bind `name` in the innermost frame
    ///
    /// # Errors
    ///
    /// `PlanBinding` when the name is already bound in that frame.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        let name = name.into();
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| Error::internal(format!("no open scope to bind '{name}'")))?;
        if frame.iter().any(|(bound, _)| *bound == name) {
            return Err(Error::binding(format!("'{name}' is bound twice in the same scope")));
        }
        frame.push((name, value));
        Ok(())
    }

    /// Innermost value bound to `name`
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.iter().find(|(bound, _)| bound == name).map(|(_, v)| v))
            .or_else(|| self.params.get(name))
    }

    /// Like [`Self::lookup`], failing on a missing name
    pub fn resolve(&self, name: &str) -> Result<&Value> {
        self.lookup(name)
            .ok_or_else(|| Error::binding(format!("unresolved reference '{name}'")))
    }
}
