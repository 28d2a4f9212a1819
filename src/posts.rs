use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Title used when a row has no title column or an empty title
pub const UNTITLED: &str = "无标题";

/// Median likes needed for the head tier
pub const HEAD_TIER_LIKES: u64 = 5000;

/// Median likes needed for the waist tier
pub const WAIST_TIER_LIKES: u64 = 500;

/// Rows shown in the raw data preview
pub const PREVIEW_ROWS: usize = 50;

/// A post counts as viral when its likes exceed this multiple of the median
pub const VIRAL_MULTIPLIER: u64 = 3;

/// Median likes above which the account is considered stable
pub const STABLE_MEDIAN_LIKES: u64 = 1000;

lazy_static! {
    static ref NON_DIGIT: Regex = Regex::new(r"[^0-9]").unwrap();
    static ref LEADING_NUMBER: Regex = Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)").unwrap();
}

/// One row of the uploaded post export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    /// 1-based data row number (header excluded), cited by the report
    pub id: usize,
    pub title: String,
    pub likes: u64,
    pub link: String,
    pub cover: String,
}

/// Traffic level of an account, decided by median likes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    Head,
    Waist,
    Tail,
}

impl Tier {
    pub fn from_median(median: u64) -> Self {
        if median >= HEAD_TIER_LIKES {
            Tier::Head
        } else if median >= WAIST_TIER_LIKES {
            Tier::Waist
        } else {
            Tier::Tail
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Head => "头部",
            Tier::Waist => "腰部",
            Tier::Tail => "尾部",
        }
    }
}

/// Headline numbers shown next to the report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_posts: usize,
    pub total_likes: u64,
    pub median_likes: u64,
    pub tier: Tier,
    pub top_posts: Vec<Post>,
    /// Percentage of all likes earned by the single best post, rounded
    pub top_share_percent: u64,
    /// Posts with more than `VIRAL_MULTIPLIER` times the median likes
    pub viral_count: usize,
    /// The first `PREVIEW_ROWS` posts, in file order
    pub preview: Vec<Post>,
}

impl Summary {
    /// Rows left out of the preview
    pub fn hidden_rows(&self) -> usize {
        self.total_posts.saturating_sub(self.preview.len())
    }

    pub fn is_stable(&self) -> bool {
        self.median_likes > STABLE_MEDIAN_LIKES
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PostsError {
    #[error("no post rows found; the file needs a header row and at least one data row")]
    Empty,
    #[error("uploaded file is not valid UTF-8 text")]
    Encoding,
}

/// Normalize a likes cell into a plain count
///
/// Handles the export formats seen in practice: `1.2万` (ten-thousands),
/// placeholder text like `赞` or `-`, and numbers with separators.
///
/// # Examples
/// ```
/// use insight::posts::clean_likes;
///
/// assert_eq!(clean_likes("1.5万"), 15000);
/// assert_eq!(clean_likes("10万+"), 100000);
/// assert_eq!(clean_likes("1,234"), 1234);
/// assert_eq!(clean_likes("赞"), 0);
/// ```
pub fn clean_likes(raw: &str) -> u64 {
    let s = raw.trim();
    if s.is_empty() {
        return 0;
    }

    // Only the leading number counts, so `10万+` and `1.2万赞` still parse
    if s.contains('万') {
        let rest = s.replace('万', "");
        return LEADING_NUMBER
            .find(rest.trim())
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|n| (n * 10000.0).round().max(0.0) as u64)
            .unwrap_or(0);
    }

    if s.contains('赞') || s == "-" {
        return 0;
    }

    NON_DIGIT.replace_all(s, "").parse().unwrap_or(0)
}

/// Column positions detected from the header row
#[derive(Debug, Default)]
struct Columns {
    title: Option<usize>,
    likes: Option<usize>,
    link: Option<usize>,
    cover: Option<usize>,
}

impl Columns {
    fn detect(headers: &[String]) -> Self {
        let find = |keys: &[&str]| headers.iter().position(|h| keys.iter().any(|k| h.contains(k)));
        Columns {
            title: find(&["title", "标题"]),
            likes: find(&["likes", "count", "点赞"]),
            link: find(&["link", "链接"]),
            cover: find(&["cover", "封面"]),
        }
    }
}

/// Parse an uploaded CSV export into posts
///
/// The first line is the header. Columns are found by keyword, so exports
/// from different scrapers work as long as their headers are recognisable.
/// Blank lines are skipped but still count towards row numbering.
///
/// # Errors
/// * `PostsError::Empty` if there is no header or no data row
pub fn parse_csv(text: &str) -> Result<Vec<Post>, PostsError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 2 {
        return Err(PostsError::Empty);
    }

    let headers: Vec<String> = parse_csv_row(lines[0])
        .into_iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let columns = Columns::detect(&headers);

    let mut posts = Vec::new();
    for (i, line) in lines.iter().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }

        let fields = parse_csv_row(line);
        let field = |idx: Option<usize>| {
            idx.and_then(|i| fields.get(i))
                .map(|f| f.trim().to_string())
                .unwrap_or_default()
        };

        let title = field(columns.title);
        posts.push(Post {
            id: i,
            title: if title.is_empty() {
                UNTITLED.to_string()
            } else {
                title
            },
            likes: clean_likes(&field(columns.likes)),
            link: field(columns.link),
            cover: field(columns.cover),
        });
    }

    if posts.is_empty() {
        return Err(PostsError::Empty);
    }

    Ok(posts)
}

/// Parse uploaded bytes, rejecting non-UTF-8 files
pub fn parse_csv_bytes(bytes: &[u8]) -> Result<Vec<Post>, PostsError> {
    let text = std::str::from_utf8(bytes).map_err(|_| PostsError::Encoding)?;
    parse_csv(text)
}

/// Compute the headline summary for a set of posts
///
/// Returns `None` for an empty slice. The median is the upper median
/// (index `len / 2` of the ascending likes).
pub fn summarize(posts: &[Post]) -> Option<Summary> {
    if posts.is_empty() {
        return None;
    }

    let mut likes: Vec<u64> = posts.iter().map(|p| p.likes).collect();
    likes.sort_unstable();
    let median_likes = likes[likes.len() / 2];

    let mut ranked: Vec<&Post> = posts.iter().collect();
    ranked.sort_by(|a, b| b.likes.cmp(&a.likes));
    let top_posts: Vec<Post> = ranked.into_iter().take(3).cloned().collect();

    let total_likes = likes.iter().fold(0u64, |acc, &l| acc.saturating_add(l));
    let top_likes = top_posts.first().map(|p| p.likes).unwrap_or(0);
    let top_share_percent = (top_likes as f64 / total_likes.max(1) as f64 * 100.0).round() as u64;

    let viral_threshold = median_likes.saturating_mul(VIRAL_MULTIPLIER);
    let viral_count = posts.iter().filter(|p| p.likes > viral_threshold).count();

    Some(Summary {
        total_posts: posts.len(),
        total_likes,
        median_likes,
        tier: Tier::from_median(median_likes),
        top_posts,
        top_share_percent,
        viral_count,
        preview: posts.iter().take(PREVIEW_ROWS).cloned().collect(),
    })
}

// Split one CSV line into fields, honoring quotes and doubled quotes
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(std::mem::take(&mut current_field));
            }
            _ => current_field.push(c),
        }
    }

    result.push(current_field);
    result
}
