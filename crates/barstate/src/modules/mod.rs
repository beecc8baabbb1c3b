//! Module types that ship with barstate. Each one is a small I/O wrapper turning some outside source into payloads.

use crate::registry::ModuleRegistry;

pub mod clock;
pub mod command;
pub mod file;
pub mod listen;

pub fn register_builtins(registry: &mut ModuleRegistry) {
    registry.register("command", command::create);
    registry.register("listen", listen::create);
    registry.register("file", file::create);
    registry.register("clock", clock::create);
}
