use anyhow::Context;

fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }

  let opts = rule_scanner::ScanOptions::from_args(&args)?;
  let summary = rule_scanner::run(&opts).context("rule scan")?;
  if !summary.failures.is_empty() {
    std::process::exit(1);
  }
  Ok(())
}
