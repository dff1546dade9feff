use std::process::ExitCode;

use config::Settings;
use runtime::RunOverrides;

fn main() -> ExitCode {
	dotenvy::dotenv().ok();
	mdkit::init_logging();

	match collect() {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			tracing::error!("collector failed: {err:#}");
			ExitCode::FAILURE
		}
	}
}

fn collect() -> anyhow::Result<()> {
	let overrides = RunOverrides::parse(std::env::args().skip(1))?;
	let settings = overrides.apply(Settings::from_env()?);
	let summary = runtime::run(&settings)?;
	tracing::info!(
		instrument = %summary.instrument,
		provider = summary.provider.as_str(),
		ticks = summary.ticks_saved,
		bars = summary.bars_saved,
		"collector done"
	);
	Ok(())
}
