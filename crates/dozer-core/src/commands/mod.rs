//! Built-in commands.

mod development;
mod general;
mod prefix;

use std::sync::Arc;

use crate::{command::CommandRegistry, Result};

pub use development::{Lifecycle, Su};
pub use general::{Help, Ping};
pub use prefix::{SetPrefix, ShowPrefix};

pub fn builtin_registry() -> Result<CommandRegistry> {
    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(Ping::new()))?;
    registry.register(Arc::new(Help::new()))?;
    registry.register(Arc::new(ShowPrefix::new()))?;
    registry.register(Arc::new(SetPrefix::new()))?;
    registry.register(Arc::new(Su::new()))?;
    registry.register(Arc::new(Lifecycle::restart()))?;
    registry.register(Arc::new(Lifecycle::shutdown()))?;
    Ok(registry)
}
