use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_banner() {
    println!();
    println!(
        "{} {}",
        style("funpay-plus").bold().cyan(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    println!("{}\n", style("Offers that keep themselves on top.").cyan());
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Text(String),
    Info(String),
    Blank,
}

/// A titled block of CLI output, built line by line and printed at once.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Text(text.to_string()));
        self
    }

    pub fn info(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Info(text.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    fn render(&self) -> Vec<String> {
        let width = self
            .lines
            .iter()
            .filter_map(|l| match l {
                GuideLine::Command(name, _) => Some(name.chars().count()),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        let mut out = vec![format!("{}", style(&self.title).bold().underlined())];
        for line in &self.lines {
            out.push(match line {
                GuideLine::Command(name, desc) => format!(
                    "  {}  {}",
                    style(format!("{:<width$}", name, width = width)).cyan().bold(),
                    desc
                ),
                GuideLine::Status(label, value) => {
                    format!("  {} {}: {}", GEAR, style(label).bold().cyan(), value)
                }
                GuideLine::Text(text) => format!("  {}", text),
                GuideLine::Info(text) => format!("  {} {}", INFO_ICON, text),
                GuideLine::Blank => String::new(),
            });
        }
        out
    }

    pub fn print(&self) {
        println!();
        for line in self.render() {
            println!("{}", line);
        }
    }
}
