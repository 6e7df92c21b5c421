//! kubetether binary entry point

fn main() -> anyhow::Result<()> {
    kubetether::run()
}
