//! Project initialization: `conductor init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use conductor::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized conductor project at {}",
            result.conductor_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .conductor/");
        println!("  ├── conductor.toml   # Engine, planner and worker settings");
        println!("  ├── state/           # Mission checkpoints and audit trails");
        println!("  ├── logs/            # Log files");
        println!("  └── procedures/      # Procedure definitions (example.yaml)");
        println!();
        println!("Next steps:");
        println!("  1. Set [worker] command in .conductor/conductor.toml");
        println!("  2. Run `conductor plan example` to preview the phases");
        println!("  3. Run `conductor run example` to start a mission");
    } else if was_initialized {
        println!(
            "Conductor project already initialized at {}",
            result.conductor_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}
