use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, OnceLock},
};

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

#[derive(Default)]
struct MetricsState {
    // 控制消息（按 type）
    messages_total: u64,
    message_errors: u64,
    per_message: HashMap<&'static str, u64>,
    per_message_err: HashMap<&'static str, u64>,
    // 入站 RPC（按方法类别）
    rpc_per_category: HashMap<&'static str, u64>,
    // 审批
    approvals_created: u64,
    approvals_approved: u64,
    approvals_rejected: u64,
    approvals_cancelled: u64,
    // 上游成功/失败与时延统计（毫秒）
    upstream_ok: u64,
    upstream_err: u64,
    upstream_latency_sum_ms: u128,
    // 简易直方图分桶（毫秒）：<50, <100, <250, <500, <1000, >=1000
    upstream_hist_buckets: [u64; 6],
}

fn state() -> MutexGuard<'static, MetricsState> {
    let m = METRICS.get_or_init(|| Mutex::new(MetricsState::default()));
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    }
}

pub fn count_ok(message_type: &'static str) {
    let mut s = state();
    s.messages_total += 1;
    *s.per_message.entry(message_type).or_insert(0) += 1;
}

pub fn count_err(message_type: &'static str) {
    let mut s = state();
    s.messages_total += 1;
    s.message_errors += 1;
    *s.per_message.entry(message_type).or_insert(0) += 1;
    *s.per_message_err.entry(message_type).or_insert(0) += 1;
}

pub fn inc_rpc_category(category: &'static str) {
    *state().rpc_per_category.entry(category).or_insert(0) += 1;
}

pub fn inc_approval_created() {
    state().approvals_created += 1;
}

pub fn inc_approval_decided(approved: bool) {
    let mut s = state();
    if approved {
        s.approvals_approved += 1;
    } else {
        s.approvals_rejected += 1;
    }
}

pub fn inc_approval_cancelled() {
    state().approvals_cancelled += 1;
}

pub fn observe_upstream_latency_ms(latency_ms: u128, ok: bool) {
    let mut s = state();
    if ok {
        s.upstream_ok += 1;
    } else {
        s.upstream_err += 1;
    }
    s.upstream_latency_sum_ms += latency_ms;
    let b = if latency_ms < 50 {
        0
    } else if latency_ms < 100 {
        1
    } else if latency_ms < 250 {
        2
    } else if latency_ms < 500 {
        3
    } else if latency_ms < 1000 {
        4
    } else {
        5
    };
    s.upstream_hist_buckets[b] += 1;
}

fn push_counter(out: &mut String, name: &str, help: &str) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} counter\n", name));
}

pub fn render_prometheus() -> String {
    let s = state();
    let mut out = String::new();

    push_counter(&mut out, "omnicore_messages_total", "Total control messages");
    out.push_str(&format!("omnicore_messages_total {}\n", s.messages_total));

    push_counter(
        &mut out,
        "omnicore_message_errors_total",
        "Control messages answered with an error",
    );
    out.push_str(&format!("omnicore_message_errors_total {}\n", s.message_errors));

    push_counter(&mut out, "omnicore_message_type_total", "Control messages per type");
    let mut per_message: Vec<_> = s.per_message.iter().collect();
    per_message.sort();
    for (k, v) in per_message {
        out.push_str(&format!("omnicore_message_type_total{{type=\"{}\"}} {}\n", k, v));
    }

    push_counter(&mut out, "omnicore_message_type_errors_total", "Control message errors per type");
    let mut per_message_err: Vec<_> = s.per_message_err.iter().collect();
    per_message_err.sort();
    for (k, v) in per_message_err {
        out.push_str(&format!(
            "omnicore_message_type_errors_total{{type=\"{}\"}} {}\n",
            k, v
        ));
    }

    push_counter(&mut out, "omnicore_rpc_requests_total", "Dapp RPC requests per method category");
    let mut per_category: Vec<_> = s.rpc_per_category.iter().collect();
    per_category.sort();
    for (k, v) in per_category {
        out.push_str(&format!(
            "omnicore_rpc_requests_total{{category=\"{}\"}} {}\n",
            k, v
        ));
    }

    push_counter(&mut out, "omnicore_approvals_total", "Approval requests by outcome");
    out.push_str(&format!(
        "omnicore_approvals_total{{outcome=\"created\"}} {}\n",
        s.approvals_created
    ));
    out.push_str(&format!(
        "omnicore_approvals_total{{outcome=\"approved\"}} {}\n",
        s.approvals_approved
    ));
    out.push_str(&format!(
        "omnicore_approvals_total{{outcome=\"rejected\"}} {}\n",
        s.approvals_rejected
    ));
    out.push_str(&format!(
        "omnicore_approvals_total{{outcome=\"cancelled\"}} {}\n",
        s.approvals_cancelled
    ));

    // 上游统计
    push_counter(&mut out, "omnicore_upstream_requests_total", "Upstream chain RPC requests");
    out.push_str(&format!(
        "omnicore_upstream_requests_total{{result=\"ok\"}} {}\n",
        s.upstream_ok
    ));
    out.push_str(&format!(
        "omnicore_upstream_requests_total{{result=\"err\"}} {}\n",
        s.upstream_err
    ));

    push_counter(&mut out, "omnicore_upstream_latency_ms_sum", "Sum of upstream latency in ms");
    out.push_str(&format!(
        "omnicore_upstream_latency_ms_sum {}\n",
        s.upstream_latency_sum_ms
    ));

    out.push_str("# HELP omnicore_upstream_latency_ms_bucket Upstream latency histogram buckets\n");
    out.push_str("# TYPE omnicore_upstream_latency_ms_bucket histogram\n");
    let bounds = [50, 100, 250, 500, 1000];
    let mut cumulative = 0u64;
    for (i, bound) in bounds.iter().enumerate() {
        cumulative += s.upstream_hist_buckets[i];
        out.push_str(&format!(
            "omnicore_upstream_latency_ms_bucket{{le=\"{}\"}} {}\n",
            bound, cumulative
        ));
    }
    // +Inf 桶
    out.push_str(&format!(
        "omnicore_upstream_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
        s.upstream_hist_buckets.iter().sum::<u64>()
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        count_ok("GET_STATE");
        count_err("UNLOCK");
        inc_rpc_category("passthrough");
        inc_approval_created();
        inc_approval_decided(false);
        observe_upstream_latency_ms(75, true);

        let text = render_prometheus();
        assert!(text.contains("omnicore_message_type_total{type=\"GET_STATE\"}"));
        assert!(text.contains("omnicore_message_type_errors_total{type=\"UNLOCK\"}"));
        assert!(text.contains("omnicore_rpc_requests_total{category=\"passthrough\"}"));
        assert!(text.contains("omnicore_approvals_total{outcome=\"rejected\"}"));
        assert!(text.contains("omnicore_upstream_latency_ms_bucket{le=\"+Inf\"}"));
    }
}
