use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = scope_shell::Args::parse();
	scope_shell::run(args).await
}
