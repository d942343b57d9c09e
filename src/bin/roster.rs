//! roster - manage the employee roster and review recorded crossings.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::IsTerminal;

use plate_gate::{
    config::GateConfig,
    ingest::{probe_devices, DEFAULT_PROBE_MAX},
    ui::Ui,
    NewEmployee, RosterStore, SqliteRosterStore,
};

#[derive(Parser, Debug)]
#[command(name = "roster", about = "Manage the employee roster and crossing log")]
struct Args {
    /// Path to the roster SQLite DB (defaults to the configured db_path)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, global = true, default_value = "auto", value_name = "MODE")]
    ui: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register an employee and their car plate
    AddEmployee {
        #[arg(long)]
        name: String,
        #[arg(long)]
        department: String,
        #[arg(long)]
        plate: String,
    },
    /// List registered employees
    Employees,
    /// Show all crossings with the owning employee where known
    Crossings,
    /// Probe local camera indices
    Cameras {
        /// Number of indices to try
        #[arg(long, default_value_t = DEFAULT_PROBE_MAX)]
        max: u32,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);
    let cfg = GateConfig::load()?;

    if let Command::Cameras { max } = args.command {
        let available = {
            let _stage = ui.stage("Probe cameras");
            probe_devices(max, &cfg.capture)
        };
        if available.is_empty() {
            println!("no cameras found in 0..{}", max);
        }
        for index in available {
            println!("camera {} available", index);
        }
        return Ok(());
    }

    let db_path = args.db.unwrap_or(cfg.db_path);
    let mut store = {
        let _stage = ui.stage("Open roster store");
        SqliteRosterStore::open(&db_path)?
    };

    match args.command {
        Command::AddEmployee {
            name,
            department,
            plate,
        } => {
            let employee = NewEmployee::new(&name, &department, &plate)?;
            let id = store.add_employee(&employee)?;
            println!("added employee {} ({}) with plate {}", id, employee.name, employee.plate);
        }
        Command::Employees => {
            println!("{:<6} {:<25} {:<20} {}", "ID", "NAME", "DEPARTMENT", "PLATE");
            for employee in store.list_employees()? {
                println!(
                    "{:<6} {:<25} {:<20} {}",
                    employee.id, employee.name, employee.department, employee.plate
                );
            }
        }
        Command::Crossings => {
            println!(
                "{:<10} {:<25} {:<20} {:<12} {}",
                "PLATE", "NAME", "DEPARTMENT", "DIRECTION", "TIME"
            );
            for row in store.list_crossings()? {
                println!(
                    "{:<10} {:<25} {:<20} {:<12} {}",
                    row.plate,
                    row.name.as_deref().unwrap_or("n/a"),
                    row.department.as_deref().unwrap_or("n/a"),
                    row.direction.as_str(),
                    row.timestamp_s
                );
            }
        }
        Command::Cameras { .. } => {}
    }
    Ok(())
}
