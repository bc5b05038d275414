use std::io::{self, BufRead, Write};

use devlab::{
    orchestration::{self, ComponentState, DevlabContext, ResetOpts},
    DevlabResult,
};
use tracing::warn;

//--------------------------------------------------------------------------------------------------
// Functions: handlers
//--------------------------------------------------------------------------------------------------

pub async fn reset_subcommand(
    ctx: &DevlabContext,
    components: Vec<String>,
    full: bool,
    reset_wizard: bool,
    yes: bool,
) -> DevlabResult<()> {
    if full && !yes && !confirm("This will wipe the whole environment, including persisted data. Continue?")? {
        println!("Aborted.");
        std::process::exit(1);
    }

    orchestration::reset(
        ctx,
        &components,
        ResetOpts::builder()
            .full(full)
            .reset_wizard(reset_wizard)
            .confirmed(true)
            .build(),
    )
    .await
}

pub async fn status_subcommand(ctx: &DevlabContext) -> DevlabResult<()> {
    let report = orchestration::status(ctx).await?;

    for orphan in &report.orphaned {
        warn!(
            "found orphaned container '{}', remove it with: docker rm -f {}",
            orphan, orphan
        );
    }

    if report.components.is_empty() {
        if !report.orphaned.is_empty() {
            std::process::exit(1);
        }
        println!("No components found.");
        return Ok(());
    }

    println!(
        "{:^16} {:^22} {:^8} {:^20} {:^14}",
        "component", "container_name", "status", "health", "local_port"
    );
    for comp in &report.components {
        let mut ports = comp.local_ports.iter();
        println!(
            "{:<16} {:<22} {:<8} {:^20} {:<14}",
            comp.component,
            comp.container_name,
            comp.state.to_string(),
            comp.health,
            ports.next().map(String::as_str).unwrap_or("")
        );
        for port in ports {
            println!("{:<16} {:<22} {:<8} {:^20} {:<14}", "", "", "", "", port);
        }
    }

    let links: Vec<_> = report
        .components
        .iter()
        .flat_map(|comp| comp.links.iter().map(move |link| (comp, link)))
        .collect();
    if !links.is_empty() {
        println!();
        println!("{:^16} {:^40} {:^65}", "component", "link", "comment");
        for (comp, link) in links {
            println!(
                "{:<16} {:<40} {:<65}",
                comp.component, link.link, link.comment
            );
        }
    }

    if report
        .components
        .iter()
        .any(|comp| comp.state == ComponentState::Missing)
    {
        println!();
        println!("Some components have no container yet. Run 'devlab up' to create them.");
    }

    Ok(())
}

pub async fn global_status_subcommand() -> DevlabResult<()> {
    let projects = orchestration::global_status().await?;

    if projects.is_empty() {
        println!("No devlab containers found.");
        return Ok(());
    }

    for project in &projects {
        println!("Project: {}", project.project);
        println!(
            "  {:^21} {:^10} {:^32}",
            "container_name", "status", "local_port"
        );
        for container in &project.containers {
            let mut ports = container.ports.iter();
            println!(
                "  {:<21} {:<10} {:<32}",
                container.name,
                container.status,
                ports.next().map(String::as_str).unwrap_or("")
            );
            for port in ports {
                println!("  {:<21} {:<10} {:<32}", "", "", port);
            }
        }
        println!();
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: helpers
//--------------------------------------------------------------------------------------------------

fn confirm(prompt: &str) -> DevlabResult<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();

    Ok(answer == "y" || answer == "yes")
}
