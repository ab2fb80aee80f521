mod reports;

pub use reports::ReportRepository;
