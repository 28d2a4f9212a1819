#![cfg(not(tarpaulin_include))]

use insight::access::{DEFAULT_CODE_LENGTH, format_batch, generate_codes};
use insight::posts::{parse_csv, summarize};
use insight::prompt::build_prompt;
use std::env;
use std::fs;

fn usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} codes <count> [length] [prefix]   Print a batch of access codes", program);
    eprintln!("  {} summary <export.csv>              Print post count, median likes and top posts", program);
    eprintln!("  {} prompt <export.csv>               Print the prompt that would be sent", program);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("cli");

    if args.len() < 3 {
        usage(program);
        return Ok(());
    }

    match args[1].as_str() {
        "codes" => {
            let count = args[2].parse().unwrap_or(10);
            let length = args
                .get(3)
                .and_then(|l| l.parse().ok())
                .unwrap_or(DEFAULT_CODE_LENGTH);
            let prefix = args.get(4).map(String::as_str).unwrap_or("");
            println!("{}", format_batch(&generate_codes(count, length, prefix)));
        }
        "summary" => {
            let posts = parse_csv(&fs::read_to_string(&args[2])?)?;
            if let Some(summary) = summarize(&posts) {
                println!("Posts:        {}", summary.total_posts);
                println!("Median likes: {}", summary.median_likes);
                println!("Tier:         {}", summary.tier.label());
                println!("Top share:    {}%", summary.top_share_percent);
                println!("Viral posts:  {}", summary.viral_count);
                for post in &summary.top_posts {
                    println!("  #{:<5} {:>8}  {}", post.id, post.likes, post.title);
                }
            }
        }
        "prompt" => {
            let posts = parse_csv(&fs::read_to_string(&args[2])?)?;
            println!("{}", build_prompt(&posts));
        }
        _ => usage(program),
    }

    Ok(())
}
