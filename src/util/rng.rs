//! 轻量随机数工具：每线程一个 xorshift64* state，避免锁与额外依赖。

use std::cell::Cell;

thread_local! {
    static RNG_STATE: Cell<u64> = Cell::new(seed());
}

fn seed() -> u64 {
    // 以 uuid v4 作为随机种子（仅在首次初始化线程本地 state 时调用一次）。
    let u = uuid::Uuid::new_v4().as_u128();
    let mut s = (u as u64) ^ ((u >> 64) as u64);
    if s == 0 {
        // 避免 xorshift 的零种子退化。
        s = 0x9E37_79B9_7F4A_7C15;
    }
    s
}

pub fn next_u64() -> u64 {
    RNG_STATE.with(|state| {
        // xorshift64*
        let mut x = state.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        state.set(x);
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    })
}

/// [0, upper) 的随机下标；upper <= 1 时恒为 0。
pub fn random_usize(upper: usize) -> usize {
    if upper <= 1 {
        return 0;
    }
    (next_u64() as usize) % upper
}

/// 从切片中随机取一个元素。
pub fn pick<'a, T>(items: &'a [T]) -> &'a T {
    &items[random_usize(items.len())]
}
