use std::net::SocketAddr;

use clap::Parser;
use failure::Error;

use garden_presence::args::{Args, Command};
use garden_presence::blend::Color;
use garden_presence::client::{self, JoinOptions};
use garden_presence::{config, server, state};

type Result<T> = std::result::Result<T, Error>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "debug"),
    );
    let args = Args::parse();
    let config = config::load(&args.config)?;

    match args.command {
        Command::Serve { address } => {
            let address: SocketAddr = address.parse()?;
            let state = state::State::new(&config);
            server::start_server(address, config, state).await;
        }
        Command::Join {
            server,
            me,
            friend,
            friend_name,
            my_color,
            friend_color,
        } => {
            let options = JoinOptions {
                server,
                friend_name: friend_name.unwrap_or_else(|| friend.clone()),
                me,
                friend,
                my_color: my_color.parse::<Color>()?,
                friend_color: friend_color.parse::<Color>()?,
            };
            client::join(options, &config).await?;
        }
    }

    Ok(())
}
