//! 行情資料：K 線模型、Parquet 轉換與外部來源
pub mod candle;
pub mod frame;
pub mod source;
pub mod timeframe;
pub mod upbit;

pub use candle::{dedup_sorted, split_by_year, Candle};
pub use frame::{candles_to_parquet, frame_to_candles, missing_columns, read_csv, read_parquet, REQUIRED_COLUMNS};
pub use source::{to_data_symbol, to_market_code, CandleSource, SourceError};
pub use timeframe::Timeframe;
pub use upbit::UpbitCandleSource;
