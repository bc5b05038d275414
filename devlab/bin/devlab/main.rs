mod handlers;

use clap::Parser;
use devlab::{
    cli::{DevlabArgs, DevlabSubcommand, GlobalSubcommand},
    orchestration::{self, BuildOpts, DevlabContext, UpOpts},
    DevlabError, DevlabResult,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let args = DevlabArgs::parse();
    init_tracing(args.verbose);

    if let Err(err) = run(args).await {
        error!("{}", err);
        std::process::exit(exit_code(&err));
    }
}

async fn run(args: DevlabArgs) -> DevlabResult<()> {
    match args.subcommand {
        DevlabSubcommand::Up {
            components,
            bind_to_host,
            update_images,
            keep_up_on_error,
            skip_provision,
        } => {
            let ctx = DevlabContext::load(args.project_root).await?;
            orchestration::up(
                &ctx,
                &components,
                UpOpts::builder()
                    .bind_to_host(bind_to_host)
                    .update_images(update_images)
                    .keep_up_on_error(keep_up_on_error)
                    .skip_provision(skip_provision)
                    .build(),
            )
            .await
        }
        DevlabSubcommand::Down { components, rm } => {
            let ctx = DevlabContext::load(args.project_root).await?;
            orchestration::down(&ctx, &components, rm).await
        }
        DevlabSubcommand::Restart {
            components,
            update_images,
        } => {
            let ctx = DevlabContext::load(args.project_root).await?;
            orchestration::restart(&ctx, &components, update_images).await
        }
        DevlabSubcommand::Reset {
            components,
            full,
            reset_wizard,
            yes,
        } => {
            let ctx = DevlabContext::load(args.project_root).await?;
            handlers::reset_subcommand(&ctx, components, full, reset_wizard, yes).await
        }
        DevlabSubcommand::Status {} => {
            let ctx = DevlabContext::load(args.project_root).await?;
            handlers::status_subcommand(&ctx).await
        }
        DevlabSubcommand::Build {
            images,
            clean,
            pull,
            no_cache,
        } => {
            let ctx = DevlabContext::load(args.project_root).await?;
            orchestration::build(
                &ctx,
                &images,
                BuildOpts::builder()
                    .clean(clean)
                    .pull(pull)
                    .no_cache(no_cache)
                    .build(),
            )
            .await
        }
        DevlabSubcommand::UpdateImages { components } => {
            let ctx = DevlabContext::load(args.project_root).await?;
            orchestration::update_images(&ctx, &components).await
        }
        DevlabSubcommand::Sh {
            component,
            user,
            command,
        } => {
            let ctx = DevlabContext::load(args.project_root).await?;
            let command = if command.is_empty() {
                None
            } else {
                Some(command.join(" "))
            };
            orchestration::shell(&ctx, &component, command, user).await
        }
        DevlabSubcommand::Global { subcommand } => match subcommand {
            GlobalSubcommand::Status {} => handlers::global_status_subcommand().await,
            GlobalSubcommand::Restart { update_images } => {
                orchestration::global_restart(update_images).await
            }
        },
    }
}

fn exit_code(err: &DevlabError) -> i32 {
    match err {
        DevlabError::ComponentsFailed { count } => *count as i32,
        _ => 1,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "devlab=debug" } else { "devlab=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}
