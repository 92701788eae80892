use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use platemates::api::{
  AddRestaurantManually, EntityId, HttpRestaurantApi, ListFilter, NewReview, UpdateRestaurant,
  UserRestaurant,
};
use platemates::auth::{EnvToken, TokenProvider, TOKEN_ENV_VAR};
use platemates::config::Config;
use platemates::query::{QueryClient, QueryResult};
use platemates::restaurants::map::{show_on_map, TextMap};
use platemates::restaurants::Restaurants;

#[derive(Parser, Debug)]
#[command(name = "platemates")]
#[command(about = "Keep track of restaurants you want to try and the ones you have reviewed")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/platemates/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the signed-in user
  Me,
  /// List saved restaurants with per-filter counts
  List {
    #[arg(short, long, default_value = "all")]
    filter: ListFilter,
  },
  /// Search for places to add
  Search { query: String },
  /// Add a restaurant to "want to go"
  Add {
    #[arg(long)]
    name: String,
    #[arg(long)]
    address: String,
    #[arg(long)]
    cuisine: Option<String>,
    #[arg(long)]
    notes: Option<String>,
  },
  /// Mark a restaurant as visited with a review
  Review {
    id: String,
    /// 1-5
    #[arg(long)]
    rating: u8,
    /// 1-4
    #[arg(long)]
    price: u8,
    #[arg(long)]
    notes: Option<String>,
  },
  /// Delete the review and move the restaurant back to "want to go"
  Unreview { id: String },
  /// Change restaurant details
  Edit {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    cuisine: Option<String>,
    #[arg(long)]
    notes: Option<String>,
  },
  /// Remove a restaurant from the list
  Remove { id: String },
  /// Print map markers for restaurants with coordinates
  Map {
    #[arg(short, long, default_value = "all")]
    filter: ListFilter,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = platemates::logging::init()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  info!(url = %config.api.url, "starting");

  let tokens: Arc<dyn TokenProvider> = Arc::new(EnvToken);
  if tokens.token().await.is_none() {
    return Err(eyre!(
      "Not signed in. Set {} to your session token.",
      TOKEN_ENV_VAR
    ));
  }

  let api = HttpRestaurantApi::new(&config.api, tokens.clone())?;
  let restaurants = Restaurants::new(Arc::new(api), tokens, QueryClient::default(), &config);

  run(&restaurants, args.command).await
}

async fn run(restaurants: &Restaurants, command: Command) -> Result<()> {
  match command {
    Command::Me => {
      let user = loaded(restaurants.current_user().await)?;
      println!("{} <{}>", user.username, user.email);
      if let Some(location) = &user.location {
        println!("location: {}", location);
      }
      if let Some(description) = &user.description {
        println!("{}", description);
      }
    }
    Command::List { filter } => {
      let view = loaded(restaurants.list_view(filter).await)?;
      println!(
        "all {} | want to go {} | been to {}",
        view.counts.all, view.counts.want_to_go, view.counts.been_to
      );
      for item in &view.items {
        print_item(item);
      }
    }
    Command::Search { query } => {
      let result = restaurants.search(&query).await;
      if result.data.is_none() && result.error.is_none() {
        println!("Type at least a couple of characters to search.");
        return Ok(());
      }
      for place in loaded(result)?.iter() {
        println!("{}  {} ({})", place.place_id, place.name, place.address);
      }
    }
    Command::Add {
      name,
      address,
      cuisine,
      notes,
    } => {
      let added = restaurants
        .add(AddRestaurantManually {
          name,
          address,
          cuisine_type: cuisine,
          notes,
        })
        .await?;
      println!("Added:");
      print_item(&added);
    }
    Command::Review {
      id,
      rating,
      price,
      notes,
    } => {
      let review = NewReview {
        rating,
        price_range: price,
        notes,
      };
      let updated = restaurants.mark_as_been_to(EntityId::new(id), review).await?;
      print_item(&updated);
    }
    Command::Unreview { id } => {
      let updated = restaurants.mark_as_want_to_go(EntityId::new(id)).await?;
      print_item(&updated);
    }
    Command::Edit {
      id,
      name,
      address,
      cuisine,
      notes,
    } => {
      let changes = UpdateRestaurant {
        name,
        address,
        cuisine_type: cuisine,
        notes,
      };
      let updated = restaurants.update(EntityId::new(id), changes).await?;
      print_item(&updated);
    }
    Command::Remove { id } => {
      restaurants.delete(EntityId::new(id.clone())).await?;
      println!("Removed {}", id);
    }
    Command::Map { filter } => {
      let view = loaded(restaurants.list_view(filter).await)?;
      let mut map = TextMap::new();
      let shown = show_on_map(&mut map, &view.items);
      print!("{}", map.output());
      let hidden = view.len() - shown;
      if hidden > 0 {
        println!("({} without coordinates not shown)", hidden);
      }
    }
  }

  Ok(())
}

/// Data of a finished query, or its error as a report.
fn loaded<T>(result: QueryResult<T>) -> Result<Arc<T>> {
  if let Some(err) = result.error {
    return Err(err.into());
  }
  result
    .data
    .ok_or_else(|| eyre!("Nothing loaded. Are you signed in?"))
}

fn print_item(item: &UserRestaurant) {
  let r = &item.restaurant;
  let mut line = format!(
    "{:>6}  {} - {} [{}]",
    item.id.as_str(),
    r.name,
    r.address,
    item.status().label()
  );
  if let Some(cuisine) = &r.cuisine_type {
    line.push_str(&format!(" {}", cuisine));
  }
  if let Some(review) = item.review() {
    line.push_str(&format!(
      " {}/5 {}",
      review.rating,
      "$".repeat(review.price_range as usize)
    ));
  }
  println!("{}", line);
  if let Some(notes) = item.notes.as_deref().filter(|n| !n.is_empty()) {
    println!("        {}", notes);
  }
}
