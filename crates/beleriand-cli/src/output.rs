use beleriand::CacheStats;
use beleriand::message::InvalidationMessage;
use colored::Colorize;
use serde_json::Value;

pub fn print_value(key: &str, value: Option<&Value>) {
    match value {
        Some(value) => {
            let rendered =
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            println!("{} {}", format!("{key}:").cyan(), rendered);
        }
        None => println!("{} {}", format!("{key}:").cyan(), "(not cached)".dimmed()),
    }
}

pub fn print_invalidation(channel: &str, message: &InvalidationMessage) {
    let scope = match message.slot {
        Some(slot) => format!("slot {slot}"),
        None if channel.contains(":clear:") => "clear".to_string(),
        None => "all slots".to_string(),
    };
    println!(
        "{} {} {} {}",
        "↯".yellow(),
        channel.cyan(),
        scope.bold(),
        message.sender.to_string().dimmed()
    );
}

pub fn print_stats(stats: &CacheStats) {
    println!("{}: {}", "Cache".cyan(), stats.name);
    println!("{}: {}", "Local entries".cyan(), stats.local_entries);
    println!("{}: {}", "Local hits".cyan(), stats.local_hits);
    println!("{}: {}", "Shared hits".cyan(), stats.shared_hits);
    println!("{}: {}", "Misses".cyan(), stats.misses);
    println!("{}: {:.1}%", "Local hit rate".cyan(), stats.local_hit_rate());
    println!("{}: {}", "Invalidations applied".cyan(), stats.invalidations_applied);
    println!("{}: {}", "Invalidations ignored".cyan(), stats.invalidations_ignored);
    println!("{}: {}", "Clears applied".cyan(), stats.clears_applied);
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}
