fn main() -> anyhow::Result<()> {
    vaultview::cli::run()
}
