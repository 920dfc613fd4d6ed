//! 增量缺口检测与分页
//!
//! 纯函数实现：输入请求区间与已有覆盖范围，输出按时间递增、互不相交的拉取分页。

use chronoforge_core::models::{Coverage, MsRange, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapDetector {
    page_size: u32,
}

impl GapDetector {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    /// 请求区间减去覆盖范围
    ///
    /// 结果有序、互不相交且都落在请求区间内；由于覆盖范围已规范化，
    /// 相邻缺口之间必然隔着已覆盖的数据，不会出现可合并的相邻缺口。
    pub fn detect(request: &MsRange, coverage: &Coverage) -> Vec<MsRange> {
        let mut gaps = Vec::new();
        let mut cursor = request.start();

        for covered in coverage.intersect(request).ranges() {
            if let Some(gap) = MsRange::new(cursor, covered.start()) {
                gaps.push(gap);
            }
            cursor = cursor.max(covered.end());
        }
        if let Some(tail) = MsRange::new(cursor, request.end()) {
            gaps.push(tail);
        }
        gaps
    }

    /// 每个分页最长跨越的毫秒数
    pub fn chunk_span_ms(&self, timeframe: Timeframe) -> i64 {
        timeframe.as_millis().saturating_mul(i64::from(self.page_size))
    }

    /// 把缺口切成最多 `page_size` 个周期桶的分页，保持时间递增
    pub fn paginate(&self, gaps: &[MsRange], timeframe: Timeframe) -> Vec<MsRange> {
        let span = self.chunk_span_ms(timeframe);
        let mut chunks = Vec::new();

        for gap in gaps {
            let mut start = gap.start();
            while start < gap.end() {
                let end = start.saturating_add(span).min(gap.end());
                if let Some(chunk) = MsRange::new(start, end) {
                    chunks.push(chunk);
                }
                start = end;
            }
        }
        chunks
    }

    pub fn plan(&self, request: &MsRange, coverage: &Coverage, timeframe: Timeframe) -> Vec<MsRange> {
        self.paginate(&Self::detect(request, coverage), timeframe)
    }
}
