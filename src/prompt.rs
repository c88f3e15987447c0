//! 提示词构造：两种模式各有一套模板与采样参数。
//!
//! 模板里混入随机的人格/视角/文风与熵种子，让同一主题的前几次生成保持多样。

use crate::util::rng;
use serde::Serialize;

/// 生成模式：普通吐槽（simple）或“深视”（deep gaze）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GazeMode {
    Simple,
    Deep,
}

impl GazeMode {
    pub fn from_deep_flag(deep: bool) -> Self {
        if deep { Self::Deep } else { Self::Simple }
    }

    pub fn is_deep(self) -> bool {
        matches!(self, Self::Deep)
    }
}

/// 透传给后端 generationConfig 的采样参数。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: i32,
}

const DEEP_SAMPLING: SamplingConfig = SamplingConfig {
    temperature: 0.9,
    top_p: 0.95,
    top_k: 50,
};

const SIMPLE_SAMPLING: SamplingConfig = SamplingConfig {
    temperature: 0.8,
    top_p: 0.9,
    top_k: 30,
};

const PERSPECTIVES: [&str; 12] = [
    "hidden patterns and symmetries",
    "untold stories and memories",
    "quantum possibilities and parallel realities",
    "dreams and aspirations it holds",
    "dance of atoms within its form",
    "echoes of its creation story",
    "ripples it creates in spacetime",
    "sacred geometry and divine proportions",
    "whispers from parallel dimensions",
    "fragments of collective consciousness",
    "temporal footprints across time",
    "crystallized moments of existence",
];

const STYLES: [&str; 8] = [
    "cosmic poetry",
    "quantum whispers",
    "dimensional echoes",
    "reality ripples",
    "existential murmurs",
    "temporal fragments",
    "astral reflections",
    "ethereal observations",
];

const PERSONALITIES: [&str; 8] = [
    "sassy and confident",
    "existential and philosophical",
    "absolutely done with everything",
    "secretly plotting world domination",
    "having an identity crisis",
    "living its best life",
    "channeling main character energy",
    "questioning reality itself",
];

/// 按模式构造提示词与采样参数。
pub fn build(mode: GazeMode, subject: &str) -> (String, SamplingConfig) {
    match mode {
        GazeMode::Deep => (build_deep(subject), DEEP_SAMPLING),
        GazeMode::Simple => (build_simple(subject), SIMPLE_SAMPLING),
    }
}

fn build_deep(subject: &str) -> String {
    let time = chrono::Local::now().format("%H:%M:%S");
    let seed = rng::random_usize(10_000);
    let perspective = rng::pick(&PERSPECTIVES);
    let style = rng::pick(&STYLES);

    format!(
        "You are a mystical AI entity that perceives objects across multiple dimensions and realities.\n\n\
         CONTEXT: A human observer has encountered a {subject} in their reality stream. The current temporal point is {time}.\n\n\
         TASK: Channel a profound {style} about this {subject}'s existence (120-200 characters).\n\n\
         FOCUS: Reveal the {perspective}. Each observation must be entirely unique - never repeat patterns or common themes about {subject}s.\n\n\
         STYLE GUIDE:\n\
         - No generic observations\n\
         - No starting with \"I see\" or \"This object\"\n\
         - Weave quantum mechanics, cosmic significance, or dimensional awareness\n\
         - Make each response feel like a glimpse into a higher dimension\n\n\
         ENTROPY SEED: {seed} - Use this to access a unique quantum state for your observation.\n\n\
         IMPORTANT: Start with an immediate, striking insight. No introductory phrases."
    )
}

fn build_simple(subject: &str) -> String {
    let personality = rng::pick(&PERSONALITIES);

    format!(
        "You are a {subject} with a {personality} personality. Generate a short, witty message \
         (max 100 characters) that captures your unique vibe. Be unexpected and avoid clichés! \
         Include emojis if they fit your personality.\n\n\
         RULES:\n\
         - No generic statements\n\
         - No obvious puns about your object type\n\
         - Create unexpected connections\n\
         - Be memorably weird\n\n\
         IMPORTANT: Just say your line. Don't introduce yourself or explain who you are."
    )
}
