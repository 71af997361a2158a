//! Relaycast daemon entry point.

fn main() -> anyhow::Result<()> {
    relaycast_lib::run()
}
