//! Supervised handle to the audio analyzer application.
//!
//! The analyzer is reached through a vendor automation interface that can go
//! away at any time (application closed, COM server restarted). The
//! supervisor owns the only handle, checks it before every use and builds a
//! fresh one when it is gone. A call that fails drops the handle so the next
//! command reattaches.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),

    #[error("analyzer call failed: {0}")]
    CallFailed(String),
}

/// Operations the service forwards to the analyzer
pub trait Instrument: Send {
    fn is_alive(&mut self) -> bool;
    fn wake_up(&mut self) -> Result<(), InstrumentError>;
    fn set_average(&mut self, averages: u32) -> Result<(), InstrumentError>;
    fn activate_measurement(&mut self, measurement_name: &str) -> Result<(), InstrumentError>;
}

/// Builds a new analyzer handle
pub trait InstrumentFactory: Send {
    fn attach(&self) -> Result<Box<dyn Instrument>, InstrumentError>;
}

/// Factory for hosts without an analyzer; every attach fails
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedInstrument;

impl InstrumentFactory for DetachedInstrument {
    fn attach(&self) -> Result<Box<dyn Instrument>, InstrumentError> {
        Err(InstrumentError::Unavailable(
            "no measurement application on this host".to_string(),
        ))
    }
}

pub struct InstrumentSupervisor {
    factory: Box<dyn InstrumentFactory>,
    current: Option<Box<dyn Instrument>>,
}

impl InstrumentSupervisor {
    pub fn new(factory: impl InstrumentFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            current: None,
        }
    }

    /// The cached handle if it still answers, otherwise a fresh one
    pub fn ensure_live(&mut self) -> Result<&mut dyn Instrument, InstrumentError> {
        let instrument = match self.current.take() {
            Some(mut existing) => {
                if existing.is_alive() {
                    existing
                } else {
                    tracing::warn!("Analyzer handle went stale, reattaching");
                    self.attach()?
                }
            }
            None => self.attach()?,
        };
        Ok(self.current.insert(instrument).as_mut())
    }

    fn attach(&self) -> Result<Box<dyn Instrument>, InstrumentError> {
        match self.factory.attach() {
            Ok(instrument) => {
                tracing::info!("Attached to analyzer");
                Ok(instrument)
            }
            Err(e) => {
                tracing::error!("Could not attach to analyzer: {}", e);
                Err(e)
            }
        }
    }

    /// Run one call against a live handle; a failure drops the handle
    pub fn call<T>(
        &mut self,
        f: impl FnOnce(&mut dyn Instrument) -> Result<T, InstrumentError>,
    ) -> Result<T, InstrumentError> {
        let result = f(self.ensure_live()?);
        if result.is_err() {
            self.current = None;
        }
        result
    }

    pub fn wake_up(&mut self) -> Result<String, InstrumentError> {
        self.call(|i| i.wake_up())?;
        Ok("API woke up successfully.".to_string())
    }

    pub fn set_average(&mut self, averages: u32) -> Result<String, InstrumentError> {
        self.call(|i| i.set_average(averages))?;
        tracing::info!("Averages set to {}", averages);
        Ok(format!("Successfully set averages to {}.", averages))
    }

    pub fn activate_measurement(&mut self, measurement_name: &str) -> Result<String, InstrumentError> {
        self.call(|i| i.activate_measurement(measurement_name))?;
        tracing::info!("Activated measurement: {}", measurement_name);
        Ok("Measurement activation initiated.".to_string())
    }
}
