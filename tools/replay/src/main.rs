fn main() -> anyhow::Result<()> {
    replay_cli::run()
}
